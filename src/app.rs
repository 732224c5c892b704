use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::widgets::ListState;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::auth::{AuthContext, RegisterOutcome, parse_recovery_link};
use crate::config::BackendConfig;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::export::ExportKind;
use crate::models::Client;
use crate::storage::{self, ThemePreference};
use crate::supabase::{AuthApi, Backend, RestApi};
use crate::totals::{self, SessionLine};
use crate::tracker::Tracker;
use arboard::Clipboard;

const TOAST_TTL: Duration = Duration::from_secs(3);
const CLOCK_TICK: Duration = Duration::from_secs(1);

/// Remote-backed services, available once the backend is configured.
pub struct Services {
    pub auth: AuthContext<AuthApi>,
    pub tracker: Tracker<RestApi>,
}

impl Services {
    pub fn connect(config: BackendConfig, session_path: Option<PathBuf>) -> Result<Self> {
        let backend = Backend::new(config)?;
        Ok(Self {
            auth: AuthContext::new(AuthApi::new(backend.clone()), session_path),
            tracker: Tracker::new(Database::new(RestApi::new(backend))),
        })
    }

    /// Points the data layer at the signed-in user and token.
    pub fn sync_session(&mut self) {
        match self.auth.session() {
            Some(session) => {
                self.tracker
                    .database()
                    .store()
                    .set_access_token(Some(session.access_token.clone()));
                self.tracker.sign_in(&session.user.id);
            }
            None => {
                self.tracker.database().store().set_access_token(None);
                self.tracker.sign_out();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    ConfigRequired,
    Loading,
    Dashboard,
    Form,
    Confirm(ConfirmAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Clients,
    Sessions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Login,
    Register,
    ForgotPassword,
    Recovery,
    ChangePassword,
    AddClient,
    EditName,
    EditRate,
    Note,
    Import,
    Search,
}

impl FormKind {
    pub fn title(self) -> &'static str {
        match self {
            FormKind::Login => "Log in",
            FormKind::Register => "Create account",
            FormKind::ForgotPassword => "Reset password",
            FormKind::Recovery => "Recovery link",
            FormKind::ChangePassword => "Change password",
            FormKind::AddClient => "Add client",
            FormKind::EditName => "Rename client",
            FormKind::EditRate => "Hourly rate",
            FormKind::Note => "Session notes",
            FormKind::Import => "Import clients",
            FormKind::Search => "Search clients",
        }
    }

    /// Forms shown while signed out.
    pub fn is_auth(self) -> bool {
        matches!(
            self,
            FormKind::Login | FormKind::Register | FormKind::ForgotPassword | FormKind::Recovery
        )
    }

    pub fn hint(self) -> &'static str {
        match self {
            FormKind::Login => "Enter log in · Ctrl+R register · Ctrl+F forgot password · Esc quit",
            FormKind::Register => "Enter create account · Esc back to log in",
            FormKind::ForgotPassword => "Enter send reset link · Ctrl+L paste recovery link · Esc back",
            FormKind::Recovery => "Paste the link from the reset email, then Enter",
            FormKind::Note => "Enter save · Esc skip",
            FormKind::Import => "Leave empty to read the clipboard (CSV Name,Rate or JSON)",
            FormKind::Search => "Enter apply · empty clears the filter",
            _ => "Enter save · Tab next field · Esc cancel",
        }
    }

    fn fields(self) -> Vec<Field> {
        match self {
            FormKind::Login => vec![Field::text("Email"), Field::secret("Password")],
            FormKind::Register => vec![
                Field::text("Full name"),
                Field::text("Email"),
                Field::secret("Password"),
                Field::secret("Confirm"),
            ],
            FormKind::ForgotPassword => vec![Field::text("Email")],
            FormKind::Recovery => vec![Field::text("Link")],
            FormKind::ChangePassword => vec![Field::secret("New password"), Field::secret("Confirm")],
            FormKind::AddClient => vec![Field::text("Name"), Field::text("Rate ($/h)")],
            FormKind::EditName => vec![Field::text("Name")],
            FormKind::EditRate => vec![Field::text("Rate ($/h)")],
            FormKind::Note => vec![Field::text("What did you work on?")],
            FormKind::Import => vec![Field::text("File")],
            FormKind::Search => vec![Field::text("Name contains")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub label: &'static str,
    pub value: String,
    pub secret: bool,
}

impl Field {
    fn text(label: &'static str) -> Self {
        Self {
            label,
            value: String::new(),
            secret: false,
        }
    }

    fn secret(label: &'static str) -> Self {
        Self {
            secret: true,
            ..Self::text(label)
        }
    }

    pub fn display(&self) -> String {
        if self.secret {
            "•".repeat(self.value.chars().count())
        } else {
            self.value.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub kind: FormKind,
    pub fields: Vec<Field>,
    pub focus: usize,
}

impl Form {
    pub fn new(kind: FormKind) -> Self {
        Self {
            kind,
            fields: kind.fields(),
            focus: 0,
        }
    }

    fn with_value(mut self, index: usize, value: impl Into<String>) -> Self {
        if let Some(field) = self.fields.get_mut(index) {
            field.value = value.into();
        }
        self
    }

    pub fn value(&self, index: usize) -> &str {
        self.fields
            .get(index)
            .map(|field| field.value.as_str())
            .unwrap_or_default()
    }

    fn next(&mut self) {
        self.focus = (self.focus + 1) % self.fields.len().max(1);
    }

    fn previous(&mut self) {
        let len = self.fields.len().max(1);
        self.focus = (self.focus + len - 1) % len;
    }

    fn push(&mut self, ch: char) {
        if let Some(field) = self.fields.get_mut(self.focus) {
            field.value.push(ch);
        }
    }

    fn pop(&mut self) {
        if let Some(field) = self.fields.get_mut(self.focus) {
            field.value.pop();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    DeleteClient { id: String, name: String },
    ResetTime { id: String, name: String },
    DeleteSession { id: String },
    ResetAll,
}

impl ConfirmAction {
    pub fn message(&self) -> String {
        match self {
            ConfirmAction::DeleteClient { name, .. } => format!(
                "Delete \"{name}\" and all of its time entries? This cannot be undone."
            ),
            ConfirmAction::ResetTime { name, .. } => format!(
                "Reset all time entries for \"{name}\"? This cannot be undone."
            ),
            ConfirmAction::DeleteSession { .. } => "Delete this session?".to_string(),
            ConfirmAction::ResetAll => {
                "Reset all data? This permanently deletes all clients and time entries.".to_string()
            }
        }
    }
}

/// Ticks once a second, and only while a timer is running.
#[derive(Debug, Default)]
pub struct LiveClock {
    last_tick: Option<Instant>,
}

impl LiveClock {
    pub fn sync(&mut self, active: bool, now: Instant) {
        match (active, self.last_tick) {
            (true, None) => self.last_tick = Some(now),
            (false, Some(_)) => self.last_tick = None,
            _ => {}
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.last_tick.is_some()
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        match self.last_tick {
            Some(last) if now.saturating_duration_since(last) >= CLOCK_TICK => {
                self.last_tick = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn stop(&mut self) {
        self.last_tick = None;
    }
}

pub struct App {
    pub should_quit: bool,
    pub needs_session_check: bool,
    pub needs_refresh: bool,
    pub mode: Mode,
    pub status: Option<String>,
    pub config_error: Option<String>,
    pub services: Option<Services>,
    pub form: Form,
    pub focus: Focus,
    pub client_state: ListState,
    pub session_state: ListState,
    pub show_help: bool,
    pub theme: ThemePreference,
    pub now: DateTime<Local>,
    pub last_refresh: Option<DateTime<Local>>,
    clock: LiveClock,
    export_dir: PathBuf,
    force_login: bool,
    toast: Option<Toast>,
}

impl App {
    pub fn new(services: Result<Services>, force_login: bool, export_dir: PathBuf) -> Self {
        let (services, config_error) = match services {
            Ok(services) => (Some(services), None),
            Err(err) => (None, Some(err.user_message())),
        };
        let mode = if services.is_some() {
            Mode::Loading
        } else {
            Mode::ConfigRequired
        };

        App {
            should_quit: false,
            needs_session_check: services.is_some(),
            needs_refresh: false,
            mode,
            status: None,
            config_error,
            services,
            form: Form::new(FormKind::Login),
            focus: Focus::Clients,
            client_state: ListState::default(),
            session_state: ListState::default(),
            show_help: false,
            theme: storage::read_theme(),
            now: Local::now(),
            last_refresh: None,
            clock: LiveClock::default(),
            export_dir,
            force_login,
            toast: None,
        }
    }

    pub fn tracker(&self) -> Option<&Tracker<RestApi>> {
        self.services.as_ref().map(|services| &services.tracker)
    }

    pub fn checking_session(&self) -> bool {
        self.services
            .as_ref()
            .is_some_and(|services| services.auth.is_loading())
    }

    pub fn user_label(&self) -> Option<String> {
        let services = self.services.as_ref()?;
        Some(services.auth.user()?.display_name().to_string())
    }

    pub fn visible_clients(&self) -> Vec<&Client> {
        self.tracker()
            .map(Tracker::filtered_clients)
            .unwrap_or_default()
    }

    pub fn today_sessions(&self) -> Vec<SessionLine> {
        self.tracker()
            .and_then(Tracker::selected_client)
            .map(|client| totals::today_sessions(client, self.now))
            .unwrap_or_default()
    }

    /// Advances the live clock; called once per loop iteration.
    pub fn tick(&mut self) {
        let active = self.tracker().is_some_and(Tracker::has_active_timer);
        let now = Instant::now();
        self.clock.sync(active, now);
        if self.clock.poll(now) {
            self.now = Local::now();
        }
    }

    pub fn shutdown(&mut self) {
        self.clock.stop();
    }

    pub fn check_session(&mut self) {
        self.needs_session_check = false;
        let force_login = std::mem::take(&mut self.force_login);
        let signed_in = match self.services.as_mut() {
            Some(services) => {
                services.auth.check_session(force_login);
                services.sync_session();
                services.auth.session().is_some()
            }
            None => return,
        };

        if signed_in {
            self.trigger_refresh();
        } else {
            self.open_form(Form::new(FormKind::Login));
        }
    }

    pub fn refresh_data(&mut self) {
        self.needs_refresh = false;
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let result = services.tracker.load_clients();
        self.mode = Mode::Dashboard;
        match result {
            Ok(()) => {
                self.last_refresh = Some(Local::now());
                self.sync_lists();
            }
            Err(err) => self.fail("Error loading data", err),
        }
    }

    pub fn handle_key_event(&mut self, key: KeyEvent) {
        self.now = Local::now();
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        match self.mode.clone() {
            Mode::ConfigRequired => {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    self.should_quit = true;
                }
            }
            Mode::Loading => {
                if key.code == KeyCode::Char('q') {
                    self.should_quit = true;
                }
            }
            Mode::Form => self.handle_form_input(key),
            Mode::Confirm(action) => self.handle_confirm_input(action, key),
            Mode::Dashboard => self.handle_dashboard_input(key),
        }
    }

    fn handle_dashboard_input(&mut self, key: KeyEvent) {
        if self.show_help {
            match key.code {
                KeyCode::Char('h') | KeyCode::Char('?') | KeyCode::Esc => self.show_help = false,
                KeyCode::Char('q') => self.should_quit = true,
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('h') | KeyCode::Char('?') => self.show_help = true,
            KeyCode::Char('r') => self.trigger_refresh(),
            KeyCode::Char('m') => self.cycle_theme(),
            KeyCode::Tab | KeyCode::BackTab => {
                self.focus = match self.focus {
                    Focus::Clients => Focus::Sessions,
                    Focus::Sessions => Focus::Clients,
                };
                self.sync_lists();
            }
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::Char(' ') | KeyCode::Enter => self.toggle_timer(),
            KeyCode::Char('a') => self.open_form(Form::new(FormKind::AddClient)),
            KeyCode::Char('e') => self.open_client_form(FormKind::EditName),
            KeyCode::Char('p') => self.open_client_form(FormKind::EditRate),
            KeyCode::Char('z') => self.toggle_archive(),
            KeyCode::Char('v') => {
                if let Some(services) = self.services.as_mut() {
                    let view = services.tracker.view().toggle();
                    services.tracker.set_view(view);
                }
                self.sync_lists();
            }
            KeyCode::Char('/') => {
                let current = self.tracker().map(|tracker| tracker.search().to_string());
                self.open_form(Form::new(FormKind::Search).with_value(0, current.unwrap_or_default()));
            }
            KeyCode::Char('d') | KeyCode::Delete => self.confirm_delete(),
            KeyCode::Char('t') => self.confirm_reset_time(),
            KeyCode::Char('X') => self.mode = Mode::Confirm(ConfirmAction::ResetAll),
            KeyCode::Char('J') => self.export(ExportKind::Json),
            KeyCode::Char('C') => self.export(ExportKind::Csv),
            KeyCode::Char('M') => self.export(ExportKind::Monthly),
            KeyCode::Char('i') => self.open_form(Form::new(FormKind::Import)),
            KeyCode::Char('P') => self.open_form(Form::new(FormKind::ChangePassword)),
            KeyCode::Char('L') => self.logout(),
            _ => {}
        }
    }

    fn handle_form_input(&mut self, key: KeyEvent) {
        let control = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('r') if control && self.form.kind == FormKind::Login => {
                self.open_form(Form::new(FormKind::Register));
            }
            KeyCode::Char('f') if control && self.form.kind == FormKind::Login => {
                let email = self.form.value(0).to_string();
                self.open_form(Form::new(FormKind::ForgotPassword).with_value(0, email));
            }
            KeyCode::Char('l') if control && self.form.kind == FormKind::ForgotPassword => {
                self.open_form(Form::new(FormKind::Recovery));
            }
            KeyCode::Enter => self.submit_form(),
            KeyCode::Esc => self.cancel_form(),
            KeyCode::Tab | KeyCode::Down => self.form.next(),
            KeyCode::BackTab | KeyCode::Up => self.form.previous(),
            KeyCode::Backspace => self.form.pop(),
            KeyCode::Char(ch) if !control && !ch.is_control() => self.form.push(ch),
            _ => {}
        }
    }

    fn handle_confirm_input(&mut self, action: ConfirmAction, key: KeyEvent) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                self.mode = Mode::Dashboard;
                self.run_confirmed(action);
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => self.mode = Mode::Dashboard,
            _ => {}
        }
    }

    fn cancel_form(&mut self) {
        self.status = None;
        match self.form.kind {
            FormKind::Login => self.should_quit = true,
            FormKind::Register | FormKind::ForgotPassword => {
                self.open_form(Form::new(FormKind::Login));
            }
            FormKind::Recovery => self.open_form(Form::new(FormKind::ForgotPassword)),
            FormKind::Note => {
                if let Some(services) = self.services.as_mut() {
                    services.tracker.skip_note();
                }
                self.mode = Mode::Dashboard;
            }
            _ => self.mode = Mode::Dashboard,
        }
    }

    fn submit_form(&mut self) {
        self.status = None;
        let form = self.form.clone();
        match form.kind {
            FormKind::Login => self.submit_login(&form),
            FormKind::Register => self.submit_register(&form),
            FormKind::ForgotPassword => self.submit_forgot(&form),
            FormKind::Recovery => self.submit_recovery(&form),
            FormKind::ChangePassword => self.submit_change_password(&form),
            FormKind::AddClient => self.submit_add_client(&form),
            FormKind::EditName => self.submit_edit(&form, true),
            FormKind::EditRate => self.submit_edit(&form, false),
            FormKind::Note => self.submit_note(&form),
            FormKind::Import => self.submit_import(&form),
            FormKind::Search => {
                if let Some(services) = self.services.as_mut() {
                    services.tracker.set_search(form.value(0).trim().to_string());
                }
                self.mode = Mode::Dashboard;
                self.sync_lists();
            }
        }
    }

    fn submit_login(&mut self, form: &Form) {
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let result = services.auth.login(form.value(0), form.value(1));
        services.sync_session();
        match result {
            Ok(()) => self.trigger_refresh(),
            Err(err) => self.status = Some(err.user_message()),
        }
    }

    fn submit_register(&mut self, form: &Form) {
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let result = services
            .auth
            .register(form.value(0), form.value(1), form.value(2), form.value(3));
        services.sync_session();
        match result {
            Ok(RegisterOutcome::SignedIn) => self.trigger_refresh(),
            Ok(RegisterOutcome::ConfirmationRequired) => {
                self.open_form(Form::new(FormKind::Login).with_value(0, form.value(1).trim()));
                self.status = Some("Account created. Check your email to confirm it, then log in.".to_string());
            }
            Err(err) => self.status = Some(err.user_message()),
        }
    }

    fn submit_forgot(&mut self, form: &Form) {
        let Some(services) = self.services.as_ref() else {
            return;
        };
        match services.auth.reset_password_for_email(form.value(0), None) {
            Ok(()) => {
                self.open_form(Form::new(FormKind::Recovery));
                self.status = Some("Reset email sent. Paste the link from it here.".to_string());
            }
            Err(err) => self.status = Some(err.user_message()),
        }
    }

    fn submit_recovery(&mut self, form: &Form) {
        let Some((access_token, refresh_token)) = parse_recovery_link(form.value(0)) else {
            self.status = Some("That link has no recovery tokens.".to_string());
            return;
        };
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let result = services.auth.set_session(&access_token, &refresh_token);
        services.sync_session();
        match result {
            Ok(()) => {
                self.open_form(Form::new(FormKind::ChangePassword));
                self.status = Some("Choose a new password.".to_string());
            }
            Err(err) => self.status = Some(err.user_message()),
        }
    }

    fn submit_change_password(&mut self, form: &Form) {
        let Some(services) = self.services.as_mut() else {
            return;
        };
        match services.auth.update_password(form.value(0), form.value(1)) {
            Ok(()) => {
                self.mode = Mode::Dashboard;
                self.set_toast("Password updated", false);
                if self.last_refresh.is_none() {
                    self.trigger_refresh();
                }
            }
            Err(err) if err.is_unauthorized() => self.fail("Error updating password", err),
            Err(err) => self.status = Some(err.user_message()),
        }
    }

    fn submit_add_client(&mut self, form: &Form) {
        let Some(rate) = parse_rate(form.value(1)) else {
            self.status = Some("Rate must be a number".to_string());
            return;
        };
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let result = services
            .tracker
            .add_client(form.value(0), rate)
            .map(|client| client.name.clone());
        match result {
            Ok(name) => {
                self.mode = Mode::Dashboard;
                self.focus = Focus::Clients;
                self.sync_lists();
                self.set_toast(format!("{name} added"), false);
            }
            Err(err) if err.is_unauthorized() => self.fail("Error adding client", err),
            Err(err) => self.status = Some(err.user_message()),
        }
    }

    fn submit_edit(&mut self, form: &Form, name: bool) {
        let value = form.value(0);
        let rate = if name {
            None
        } else {
            match parse_rate(value) {
                Some(rate) => Some(rate),
                None => {
                    self.status = Some("Rate must be a number".to_string());
                    return;
                }
            }
        };
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let Some(id) = services.tracker.selected_id().map(str::to_string) else {
            self.mode = Mode::Dashboard;
            return;
        };
        let result = services
            .tracker
            .update_client(&id, name.then_some(value), rate);
        match result {
            Ok(()) => {
                self.mode = Mode::Dashboard;
                self.set_toast("Client updated", false);
            }
            Err(err) if err.is_unauthorized() => self.fail("Error updating client", err),
            Err(err) => self.status = Some(err.user_message()),
        }
    }

    fn submit_note(&mut self, form: &Form) {
        let note = form.value(0).trim().to_string();
        let result = match self.services.as_mut() {
            Some(services) => services.tracker.add_note(&note),
            None => return,
        };
        self.mode = Mode::Dashboard;
        match result {
            Ok(()) if !note.is_empty() => self.set_toast("Note added", false),
            Ok(()) => {}
            Err(err) => self.fail("Error saving note", err),
        }
    }

    fn submit_import(&mut self, form: &Form) {
        let source = form.value(0).trim();
        let text = if source.is_empty() {
            Clipboard::new()
                .and_then(|mut clipboard| clipboard.get_text())
                .map_err(|err| format!("Clipboard error: {err}"))
        } else {
            fs::read_to_string(expand_home(source))
                .map_err(|err| format!("Could not read {source}: {err}"))
        };
        let text = match text {
            Ok(text) => text,
            Err(message) => {
                self.status = Some(message);
                return;
            }
        };

        let Some(services) = self.services.as_mut() else {
            return;
        };
        let result = services.tracker.import_clients(&text);
        match result {
            Ok(summary) => {
                self.mode = Mode::Dashboard;
                self.sync_lists();
                let message = if summary.added == 0 {
                    "No new clients to import".to_string()
                } else {
                    format!("Imported {} new clients", summary.added)
                };
                self.set_toast(message, false);
            }
            Err(err @ Error::Import(_)) => self.status = Some(err.user_message()),
            Err(err) => {
                self.mode = Mode::Dashboard;
                self.fail("Error importing clients", err);
            }
        }
    }

    fn run_confirmed(&mut self, action: ConfirmAction) {
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let tracker = &mut services.tracker;
        let outcome = match &action {
            ConfirmAction::DeleteClient { id, .. } => tracker
                .delete_client(id)
                .map(|name| format!("{name} and all associated time entries deleted")),
            ConfirmAction::ResetTime { id, name } => tracker
                .reset_client_time(id)
                .map(|_| format!("All time entries for {name} cleared")),
            ConfirmAction::DeleteSession { id } => tracker
                .delete_time_entry(id)
                .map(|()| "Time entry deleted".to_string()),
            ConfirmAction::ResetAll => tracker
                .reset_all()
                .map(|()| "All time tracking data cleared".to_string()),
        };
        self.sync_lists();
        match outcome {
            Ok(message) => self.set_toast(message, false),
            Err(err) => self.fail("Action failed", err),
        }
    }

    fn toggle_timer(&mut self) {
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let Some(client) = services.tracker.selected_client() else {
            self.set_toast("Select a client first", true);
            return;
        };
        let id = client.id.clone();
        let running = client.has_active_timer();

        if running {
            match services.tracker.stop_timer(&id) {
                Ok(()) => {
                    if services.tracker.pending_note().is_some() {
                        self.open_form(Form::new(FormKind::Note));
                    }
                    self.set_toast("Timer stopped", false);
                }
                Err(err) => self.fail("Error stopping timer", err),
            }
        } else {
            match services.tracker.start_timer(&id) {
                Ok(()) => {
                    self.now = Local::now();
                    self.set_toast("Timer started", false);
                }
                Err(err) => self.fail("Error starting timer", err),
            }
        }
    }

    fn toggle_archive(&mut self) {
        let Some(services) = self.services.as_mut() else {
            return;
        };
        let Some(client) = services.tracker.selected_client() else {
            return;
        };
        let (id, name) = (client.id.clone(), client.name.clone());
        let result = services.tracker.toggle_archive(&id);
        self.sync_lists();
        match result {
            Ok(true) => self.set_toast(format!("{name} archived"), false),
            Ok(false) => self.set_toast(format!("{name} restored"), false),
            Err(err) => self.fail("Error updating client", err),
        }
    }

    fn confirm_delete(&mut self) {
        if self.focus == Focus::Sessions {
            let sessions = self.today_sessions();
            if let Some(session) = self.session_state.selected().and_then(|i| sessions.get(i)) {
                self.mode = Mode::Confirm(ConfirmAction::DeleteSession {
                    id: session.id.clone(),
                });
            }
            return;
        }
        if let Some(client) = self.tracker().and_then(Tracker::selected_client) {
            self.mode = Mode::Confirm(ConfirmAction::DeleteClient {
                id: client.id.clone(),
                name: client.name.clone(),
            });
        }
    }

    fn confirm_reset_time(&mut self) {
        let Some(client) = self.tracker().and_then(Tracker::selected_client) else {
            return;
        };
        if client.has_active_timer() {
            self.set_toast("Please stop the active timer before resetting time", true);
            return;
        }
        self.mode = Mode::Confirm(ConfirmAction::ResetTime {
            id: client.id.clone(),
            name: client.name.clone(),
        });
    }

    fn open_client_form(&mut self, kind: FormKind) {
        let Some(client) = self.tracker().and_then(Tracker::selected_client) else {
            self.set_toast("Select a client first", true);
            return;
        };
        let value = match kind {
            FormKind::EditRate => format!("{}", client.hourly_rate),
            _ => client.name.clone(),
        };
        self.open_form(Form::new(kind).with_value(0, value));
    }

    fn export(&mut self, kind: ExportKind) {
        let Some(tracker) = self.tracker() else {
            return;
        };
        let result = tracker
            .render_export(kind, Local::now())
            .and_then(|(name, body)| write_export(&self.export_dir, &name, &body));
        match result {
            Ok(path) => {
                info!(path = %path.display(), ?kind, "export written");
                self.set_toast(format!("{}: {}", kind.done_message(), path.display()), false);
            }
            Err(err) => self.fail("Export failed", err),
        }
    }

    fn logout(&mut self) {
        if let Some(services) = self.services.as_mut() {
            services.auth.logout();
            services.sync_session();
        }
        self.last_refresh = None;
        self.client_state.select(None);
        self.session_state.select(None);
        self.open_form(Form::new(FormKind::Login));
    }

    fn cycle_theme(&mut self) {
        self.theme = self.theme.next();
        if let Err(err) = storage::write_theme(self.theme) {
            warn!(error = %err, "failed to save theme");
        }
    }

    fn move_selection(&mut self, delta: isize) {
        match self.focus {
            Focus::Clients => {
                let ids: Vec<String> = self
                    .visible_clients()
                    .iter()
                    .map(|client| client.id.clone())
                    .collect();
                let Some(index) = step(self.client_state.selected(), delta, ids.len()) else {
                    return;
                };
                if let Some(services) = self.services.as_mut() {
                    services.tracker.select(&ids[index]);
                }
                self.session_state.select(None);
            }
            Focus::Sessions => {
                let len = self.today_sessions().len();
                if let Some(index) = step(self.session_state.selected(), delta, len) {
                    self.session_state.select(Some(index));
                }
            }
        }
        self.sync_lists();
    }

    /// Keeps list cursors in line with the tracker's selection.
    fn sync_lists(&mut self) {
        let selected = self.tracker().and_then(|tracker| {
            let id = tracker.selected_id()?;
            tracker
                .filtered_clients()
                .iter()
                .position(|client| client.id == id)
        });
        self.client_state.select(selected);

        let sessions = self.today_sessions().len();
        let cursor = match (self.focus, self.session_state.selected()) {
            (_, _) if sessions == 0 => None,
            (Focus::Sessions, None) => Some(0),
            (_, Some(index)) => Some(index.min(sessions - 1)),
            (Focus::Clients, None) => None,
        };
        self.session_state.select(cursor);
    }

    fn trigger_refresh(&mut self) {
        self.mode = Mode::Loading;
        self.needs_refresh = true;
    }

    fn open_form(&mut self, form: Form) {
        self.form = form;
        self.mode = Mode::Form;
    }

    /// Reports a failed action. An expired session is renewed once; when
    /// that fails the user is sent back to the login form.
    fn fail(&mut self, context: &str, err: Error) {
        warn!(error = %err, context, "action failed");
        if !err.is_unauthorized() {
            self.set_toast(format!("{context}: {}", err.user_message()), true);
            return;
        }

        let renewed = match self.services.as_mut() {
            Some(services) => {
                let renewed = services.auth.refresh().is_ok();
                services.sync_session();
                renewed
            }
            None => false,
        };
        if renewed {
            self.set_toast("Session renewed. Please try again.", true);
        } else {
            self.last_refresh = None;
            self.open_form(Form::new(FormKind::Login));
            self.status = Some("Your session has expired. Please log in again.".to_string());
        }
    }

    pub fn active_toast(&mut self) -> Option<ToastView> {
        let toast = self.toast.as_ref()?;
        if toast.created_at.elapsed() > TOAST_TTL {
            self.toast = None;
            return None;
        }
        Some(ToastView {
            message: toast.message.clone(),
            is_error: toast.is_error,
        })
    }

    fn set_toast(&mut self, message: impl Into<String>, is_error: bool) {
        self.toast = Some(Toast {
            message: message.into(),
            created_at: Instant::now(),
            is_error,
        });
    }
}

struct Toast {
    message: String,
    created_at: Instant,
    is_error: bool,
}

pub struct ToastView {
    pub message: String,
    pub is_error: bool,
}

pub fn write_export(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, body)?;
    Ok(path)
}

fn parse_rate(value: &str) -> Option<f64> {
    let value = value.trim().trim_start_matches('$');
    if value.is_empty() {
        return Some(0.0);
    }
    value.parse::<f64>().ok().filter(|rate| rate.is_finite())
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/").zip(dirs::home_dir()) {
        Some((rest, home)) => home.join(rest),
        None => PathBuf::from(path),
    }
}

fn step(current: Option<usize>, delta: isize, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let next = match current {
        None => 0,
        Some(index) => (index as isize + delta).rem_euclid(len as isize) as usize,
    };
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_clock_ticks_only_while_active() {
        let start = Instant::now();
        let mut clock = LiveClock::default();
        clock.sync(false, start);
        assert!(!clock.is_running());
        assert!(!clock.poll(start + Duration::from_secs(5)));

        clock.sync(true, start);
        assert!(!clock.poll(start + Duration::from_millis(500)));
        assert!(clock.poll(start + Duration::from_millis(1000)));
        assert!(!clock.poll(start + Duration::from_millis(1500)));
        assert!(clock.poll(start + Duration::from_millis(2100)));

        clock.sync(false, start);
        assert!(!clock.is_running());
        assert!(!clock.poll(start + Duration::from_secs(10)));
    }

    #[test]
    fn form_editing_moves_between_fields() {
        let mut form = Form::new(FormKind::Login);
        for ch in "ada@example.com".chars() {
            form.push(ch);
        }
        form.next();
        for ch in "secret".chars() {
            form.push(ch);
        }
        form.pop();
        assert_eq!(form.value(0), "ada@example.com");
        assert_eq!(form.value(1), "secre");
        assert_eq!(form.fields[1].display(), "•••••");

        form.next();
        assert_eq!(form.focus, 0);
        form.previous();
        assert_eq!(form.focus, 1);
    }

    #[test]
    fn rates_accept_dollar_sign_and_blank() {
        assert_eq!(parse_rate("75"), Some(75.0));
        assert_eq!(parse_rate(" $62.5 "), Some(62.5));
        assert_eq!(parse_rate(""), Some(0.0));
        assert_eq!(parse_rate("abc"), None);
        assert_eq!(parse_rate("inf"), None);
    }

    #[test]
    fn step_wraps_around() {
        assert_eq!(step(None, 1, 3), Some(0));
        assert_eq!(step(Some(2), 1, 3), Some(0));
        assert_eq!(step(Some(0), -1, 3), Some(2));
        assert_eq!(step(Some(0), 1, 0), None);
    }

    #[test]
    fn missing_config_shows_fatal_screen() {
        let app = App::new(
            Err(Error::from(crate::error::ConfigError::MissingUrl)),
            false,
            PathBuf::from("."),
        );
        assert_eq!(app.mode, Mode::ConfigRequired);
        assert!(!app.needs_session_check);
        assert!(app.config_error.unwrap().contains("CLIENTTIME_SUPABASE_URL"));
    }

    #[test]
    fn export_is_written_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(&dir.path().join("exports"), "a.csv", "x\n").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "x\n");
    }
}
