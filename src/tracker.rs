use chrono::{DateTime, Local, Utc};
use tracing::{info, warn};

use crate::database::{Database, format_timestamp};
use crate::error::{RemoteError, Result, ValidationError};
use crate::export::{self, ExportKind};
use crate::import::{self, ImportFormat};
use crate::models::{Client, ClientUpdate, NewClient, NewTimeEntry, TimeEntry, TimeEntryUpdate};
use crate::store::TableStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Active,
    Archived,
}

impl View {
    pub fn toggle(self) -> Self {
        match self {
            View::Active => View::Archived,
            View::Archived => View::Active,
        }
    }
}

/// Entry that was just stopped and is waiting for an optional note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNote {
    pub client_id: String,
    pub entry_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub format: ImportFormat,
    pub added: usize,
    pub skipped: usize,
}

/// In-memory client list of the signed-in user, kept in step with the
/// backend by every action.
pub struct Tracker<S> {
    db: Database<S>,
    user_id: Option<String>,
    clients: Vec<Client>,
    selected: Option<String>,
    view: View,
    search: String,
    pending_note: Option<PendingNote>,
}

impl<S: TableStore> Tracker<S> {
    pub fn new(db: Database<S>) -> Self {
        Self {
            db,
            user_id: None,
            clients: Vec::new(),
            selected: None,
            view: View::Active,
            search: String::new(),
            pending_note: None,
        }
    }

    pub fn database(&self) -> &Database<S> {
        &self.db
    }

    pub fn sign_in(&mut self, user_id: &str) {
        if self.user_id.as_deref() != Some(user_id) {
            self.clear();
        }
        self.user_id = Some(user_id.to_string());
    }

    pub fn sign_out(&mut self) {
        self.clear();
        self.user_id = None;
    }

    fn clear(&mut self) {
        self.clients.clear();
        self.selected = None;
        self.view = View::Active;
        self.search.clear();
        self.pending_note = None;
    }

    fn user_id(&self) -> Result<String> {
        self.user_id
            .clone()
            .ok_or_else(|| RemoteError::Unauthorized("Not signed in".to_string()).into())
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, search: String) {
        self.search = search;
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn select(&mut self, client_id: &str) {
        if self.clients.iter().any(|client| client.id == client_id) {
            self.selected = Some(client_id.to_string());
        }
    }

    pub fn selected_client(&self) -> Option<&Client> {
        self.selected.as_deref().and_then(|id| self.client(id))
    }

    pub fn pending_note(&self) -> Option<&PendingNote> {
        self.pending_note.as_ref()
    }

    /// Clients in the current view whose name contains the search text.
    pub fn filtered_clients(&self) -> Vec<&Client> {
        let needle = self.search.to_lowercase();
        let archived = self.view == View::Archived;
        self.clients
            .iter()
            .filter(|client| client.archived == archived)
            .filter(|client| client.name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Active and archived client counts.
    pub fn counts(&self) -> (usize, usize) {
        let archived = self.clients.iter().filter(|client| client.archived).count();
        (self.clients.len() - archived, archived)
    }

    pub fn has_active_timer(&self) -> bool {
        self.clients.iter().any(Client::has_active_timer)
    }

    pub fn load_clients(&mut self) -> Result<()> {
        let user_id = self.user_id()?;
        let rows = self.db.get_clients(&user_id)?;
        let mut clients = Vec::with_capacity(rows.len());
        for row in rows {
            let entries = self.db.get_time_entries(&row.id)?;
            clients.push(Client::from_row(row, entries));
        }
        self.clients = clients;

        let still_there = self
            .selected
            .as_deref()
            .is_some_and(|id| self.clients.iter().any(|client| client.id == id));
        if !still_there {
            self.selected = self.first_active(None);
        }
        info!(clients = self.clients.len(), "clients loaded");
        Ok(())
    }

    pub fn add_client(&mut self, name: &str, hourly_rate: f64) -> Result<&Client> {
        let user_id = self.user_id()?;
        let row = self.db.create_client(NewClient {
            user_id,
            name: name.to_string(),
            archived: false,
            hourly_rate,
        })?;
        info!(client_id = %row.id, "client added");

        let client = Client::from_row(row, Vec::new());
        self.selected = Some(client.id.clone());
        self.view = View::Active;
        self.clients.insert(0, client);
        Ok(&self.clients[0])
    }

    pub fn update_client(
        &mut self,
        client_id: &str,
        name: Option<&str>,
        hourly_rate: Option<f64>,
    ) -> Result<()> {
        let row = self.db.update_client(
            client_id,
            ClientUpdate {
                name: name.map(str::to_string),
                hourly_rate,
                archived: None,
            },
        )?;
        if let Some(client) = self.client_mut(client_id) {
            client.name = row.name;
            client.hourly_rate = row.hourly_rate.unwrap_or(0.0);
        }
        Ok(())
    }

    pub fn start_timer(&mut self, client_id: &str) -> Result<()> {
        let user_id = self.user_id()?;
        let client = self.require_client(client_id)?;
        if client.has_active_timer() {
            return Err(ValidationError::State(format!(
                "A timer is already running for {}",
                client.name
            ))
            .into());
        }

        let row = self.db.create_time_entry(NewTimeEntry {
            client_id: client_id.to_string(),
            user_id,
            start_time: format_timestamp(Utc::now()),
            notes: None,
        })?;
        info!(client_id, entry_id = %row.id, "timer started");
        if let Some(client) = self.client_mut(client_id) {
            client.time_entries.insert(0, TimeEntry::from(row));
        }
        Ok(())
    }

    /// Stops the running entry and queues it for a note.
    pub fn stop_timer(&mut self, client_id: &str) -> Result<()> {
        let client = self.require_client(client_id)?;
        let Some(active) = client.active_entry() else {
            return Err(ValidationError::State(format!("No timer is running for {}", client.name)).into());
        };
        let entry_id = active.id.clone();
        let end = Utc::now().max(active.start_time);

        let row = self.db.update_time_entry(
            &entry_id,
            TimeEntryUpdate {
                end_time: Some(format_timestamp(end)),
                notes: None,
            },
        )?;
        info!(client_id, entry_id = %entry_id, "timer stopped");
        if let Some(entry) = self.entry_mut(client_id, &entry_id) {
            entry.end_time = row.end_time.or(Some(end));
        }
        self.pending_note = Some(PendingNote {
            client_id: client_id.to_string(),
            entry_id,
        });
        Ok(())
    }

    /// Saves a note on the entry stopped last. A blank note clears it.
    pub fn add_note(&mut self, note: &str) -> Result<()> {
        let Some(pending) = self.pending_note.clone() else {
            return Ok(());
        };
        let note = note.trim();
        let row = self.db.update_time_entry(
            &pending.entry_id,
            TimeEntryUpdate {
                end_time: None,
                notes: Some((!note.is_empty()).then(|| note.to_string())),
            },
        )?;
        if let Some(entry) = self.entry_mut(&pending.client_id, &pending.entry_id) {
            entry.notes = row.notes.filter(|note| !note.is_empty());
        }
        self.pending_note = None;
        Ok(())
    }

    pub fn skip_note(&mut self) {
        self.pending_note = None;
    }

    /// Flips the archived flag and returns the new value. Archiving the
    /// selected client moves the selection to another active client.
    pub fn toggle_archive(&mut self, client_id: &str) -> Result<bool> {
        let archived = !self.require_client(client_id)?.archived;
        self.db.update_client(
            client_id,
            ClientUpdate {
                archived: Some(archived),
                ..ClientUpdate::default()
            },
        )?;
        if let Some(client) = self.client_mut(client_id) {
            client.archived = archived;
        }
        if archived && self.selected.as_deref() == Some(client_id) {
            self.selected = self.first_active(Some(client_id));
        }
        info!(client_id, archived, "archive toggled");
        Ok(archived)
    }

    /// Deletes the client with all of its entries and returns its name.
    pub fn delete_client(&mut self, client_id: &str) -> Result<String> {
        let name = self.require_client(client_id)?.name.clone();
        self.db.delete_client(client_id)?;
        self.clients.retain(|client| client.id != client_id);
        if self
            .pending_note
            .as_ref()
            .is_some_and(|pending| pending.client_id == client_id)
        {
            self.pending_note = None;
        }
        if self.selected.as_deref() == Some(client_id) {
            self.selected = self.first_active(None);
        }
        info!(client_id, "client deleted");
        Ok(name)
    }

    /// Deletes every entry of a client. Refused while its timer runs.
    pub fn reset_client_time(&mut self, client_id: &str) -> Result<usize> {
        let client = self.require_client(client_id)?;
        if client.has_active_timer() {
            return Err(ValidationError::State(
                "Please stop the active timer before resetting time".to_string(),
            )
            .into());
        }
        let entry_ids: Vec<String> = client.time_entries.iter().map(|entry| entry.id.clone()).collect();

        for entry_id in &entry_ids {
            self.db.delete_time_entry(entry_id)?;
            if let Some(client) = self.client_mut(client_id) {
                client.time_entries.retain(|entry| &entry.id != entry_id);
            }
        }
        info!(client_id, removed = entry_ids.len(), "client time reset");
        Ok(entry_ids.len())
    }

    pub fn delete_time_entry(&mut self, entry_id: &str) -> Result<()> {
        self.db.delete_time_entry(entry_id)?;
        for client in &mut self.clients {
            client.time_entries.retain(|entry| entry.id != entry_id);
        }
        if self
            .pending_note
            .as_ref()
            .is_some_and(|pending| pending.entry_id == entry_id)
        {
            self.pending_note = None;
        }
        Ok(())
    }

    /// Creates the clients named in `text` that do not exist yet, then
    /// reloads the list. Each created client joins the list immediately, so
    /// a failure part way through never hides it from the next import.
    pub fn import_clients(&mut self, text: &str) -> Result<ImportSummary> {
        let user_id = self.user_id()?;
        let parsed = import::parse(text)?;
        let total = parsed.clients.len();
        let fresh = import::without_duplicates(
            parsed.clients,
            self.clients.iter().map(|client| client.name.as_str()),
        );

        let mut added = 0;
        for client in &fresh {
            let row = self.db.create_client(NewClient {
                user_id: user_id.clone(),
                name: client.name.clone(),
                archived: false,
                hourly_rate: client.hourly_rate,
            })?;
            self.clients.insert(0, Client::from_row(row, Vec::new()));
            added += 1;
        }
        if added > 0 {
            self.load_clients()?;
        }
        info!(added, skipped = total - added, format = ?parsed.format, "clients imported");
        Ok(ImportSummary {
            format: parsed.format,
            added,
            skipped: total - added,
        })
    }

    /// Deletes every client. Stops at the first failure; clients deleted
    /// before it stay deleted.
    pub fn reset_all(&mut self) -> Result<()> {
        let ids: Vec<String> = self.clients.iter().map(|client| client.id.clone()).collect();
        for id in ids {
            if let Err(err) = self.db.delete_client(&id) {
                warn!(client_id = %id, error = %err, "reset stopped early");
                return Err(err);
            }
            self.clients.retain(|client| client.id != id);
        }
        self.selected = None;
        self.pending_note = None;
        info!("all data reset");
        Ok(())
    }

    pub fn export_snapshot(&self, now: DateTime<Utc>) -> Result<String> {
        let user_id = self.user_id()?;
        Ok(export::to_json(&self.clients, self.selected_id(), &user_id, now)?)
    }

    /// File name and contents of an export taken at `now`.
    pub fn render_export(&self, kind: ExportKind, now: DateTime<Local>) -> Result<(String, String)> {
        let body = match kind {
            ExportKind::Json => self.export_snapshot(now.with_timezone(&Utc))?,
            ExportKind::Csv => export::to_csv(&self.db.get_all_time_entries(&self.user_id()?)?),
            ExportKind::Monthly => export::monthly_report(&self.clients, now),
        };
        Ok((kind.file_name(now), body))
    }

    fn client(&self, client_id: &str) -> Option<&Client> {
        self.clients.iter().find(|client| client.id == client_id)
    }

    fn client_mut(&mut self, client_id: &str) -> Option<&mut Client> {
        self.clients.iter_mut().find(|client| client.id == client_id)
    }

    fn entry_mut(&mut self, client_id: &str, entry_id: &str) -> Option<&mut TimeEntry> {
        self.client_mut(client_id)?
            .time_entries
            .iter_mut()
            .find(|entry| entry.id == entry_id)
    }

    fn require_client(&self, client_id: &str) -> Result<&Client> {
        self.client(client_id)
            .ok_or_else(|| RemoteError::NotFound.into())
    }

    fn first_active(&self, except: Option<&str>) -> Option<String> {
        self.clients
            .iter()
            .find(|client| !client.archived && Some(client.id.as_str()) != except)
            .map(|client| client.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ImportError};
    use crate::store::Table;
    use crate::store::memory::MemoryStore;

    const USER: &str = "user-0000000001";

    fn tracker() -> Tracker<MemoryStore> {
        let mut tracker = Tracker::new(Database::new(MemoryStore::new()));
        tracker.sign_in(USER);
        tracker
    }

    fn add(tracker: &mut Tracker<MemoryStore>, name: &str) -> String {
        tracker.add_client(name, 50.0).unwrap().id.clone()
    }

    #[test]
    fn requires_signed_in_user() {
        let mut tracker = Tracker::new(Database::new(MemoryStore::new()));
        assert!(tracker.load_clients().unwrap_err().is_unauthorized());
        assert!(tracker.add_client("Acme", 1.0).unwrap_err().is_unauthorized());
    }

    #[test]
    fn load_selects_first_active_client() {
        let mut tracker = tracker();
        let first = add(&mut tracker, "First");
        let second = add(&mut tracker, "Second");
        tracker.toggle_archive(&second).unwrap();

        tracker.sign_out();
        tracker.sign_in(USER);
        assert!(tracker.clients().is_empty());
        tracker.load_clients().unwrap();

        assert_eq!(tracker.clients().len(), 2);
        assert_eq!(tracker.selected_id(), Some(first.as_str()));
        assert_eq!(tracker.counts(), (1, 1));
    }

    #[test]
    fn adding_selects_new_client_and_shows_active_view() {
        let mut tracker = tracker();
        tracker.set_view(View::Archived);
        let id = add(&mut tracker, "  Acme Corp ");
        assert_eq!(tracker.selected_id(), Some(id.as_str()));
        assert_eq!(tracker.view(), View::Active);
        assert_eq!(tracker.clients()[0].name, "Acme Corp");
    }

    #[test]
    fn archiving_selected_client_moves_selection() {
        let mut tracker = tracker();
        let a = add(&mut tracker, "A");
        let b = add(&mut tracker, "B");
        tracker.select(&b);

        assert!(tracker.toggle_archive(&b).unwrap());
        assert_eq!(tracker.selected_id(), Some(a.as_str()));

        assert!(tracker.toggle_archive(&a).unwrap());
        assert_eq!(tracker.selected_id(), None);

        assert!(!tracker.toggle_archive(&a).unwrap());
        assert_eq!(tracker.counts(), (1, 1));
    }

    #[test]
    fn filtered_clients_respect_view_and_search() {
        let mut tracker = tracker();
        add(&mut tracker, "Acme Corp");
        add(&mut tracker, "Tech Startup");
        let old = add(&mut tracker, "Acme Legacy");
        tracker.toggle_archive(&old).unwrap();

        tracker.set_search("acme".to_string());
        let names: Vec<&str> = tracker.filtered_clients().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Acme Corp"]);

        tracker.set_view(View::Archived);
        let names: Vec<&str> = tracker.filtered_clients().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Acme Legacy"]);
    }

    #[test]
    fn timer_cycle_with_note() {
        let mut tracker = tracker();
        let id = add(&mut tracker, "Acme Corp");

        tracker.start_timer(&id).unwrap();
        assert!(tracker.has_active_timer());
        assert!(matches!(
            tracker.start_timer(&id),
            Err(Error::Validation(ValidationError::State(_)))
        ));

        tracker.stop_timer(&id).unwrap();
        assert!(!tracker.has_active_timer());
        let pending = tracker.pending_note().cloned().unwrap();
        assert_eq!(pending.client_id, id);

        tracker.add_note("  Design review  ").unwrap();
        assert!(tracker.pending_note().is_none());
        let entry = &tracker.selected_client().unwrap().time_entries[0];
        assert_eq!(entry.notes.as_deref(), Some("Design review"));
        assert!(entry.end_time.unwrap() >= entry.start_time);
    }

    #[test]
    fn skipping_note_leaves_entry_untouched() {
        let mut tracker = tracker();
        let id = add(&mut tracker, "Acme Corp");
        tracker.start_timer(&id).unwrap();
        tracker.stop_timer(&id).unwrap();
        let calls = tracker.database().store().calls().len();

        tracker.skip_note();
        tracker.add_note("ignored").unwrap();
        assert_eq!(tracker.database().store().calls().len(), calls);
        assert_eq!(tracker.clients()[0].time_entries[0].notes, None);
    }

    #[test]
    fn stopping_without_running_timer_fails() {
        let mut tracker = tracker();
        let id = add(&mut tracker, "Acme Corp");
        assert!(matches!(
            tracker.stop_timer(&id),
            Err(Error::Validation(ValidationError::State(_)))
        ));
    }

    #[test]
    fn reset_is_refused_while_running() {
        let mut tracker = tracker();
        let id = add(&mut tracker, "Acme Corp");
        tracker.start_timer(&id).unwrap();
        assert!(matches!(
            tracker.reset_client_time(&id),
            Err(Error::Validation(ValidationError::State(_)))
        ));

        tracker.stop_timer(&id).unwrap();
        tracker.skip_note();
        tracker.start_timer(&id).unwrap();
        tracker.stop_timer(&id).unwrap();
        assert_eq!(tracker.reset_client_time(&id).unwrap(), 2);
        assert!(tracker.clients()[0].time_entries.is_empty());
        assert!(tracker.database().store().rows(Table::TimeEntries).is_empty());
    }

    #[test]
    fn deleting_selected_client_selects_first_remaining_active() {
        let mut tracker = tracker();
        let a = add(&mut tracker, "A");
        let b = add(&mut tracker, "B");
        tracker.start_timer(&b).unwrap();

        assert_eq!(tracker.delete_client(&b).unwrap(), "B");
        assert_eq!(tracker.selected_id(), Some(a.as_str()));
        assert!(!tracker.has_active_timer());
        assert!(tracker.database().store().rows(Table::TimeEntries).is_empty());

        tracker.delete_client(&a).unwrap();
        assert_eq!(tracker.selected_id(), None);
    }

    #[test]
    fn delete_time_entry_removes_it_locally() {
        let mut tracker = tracker();
        let id = add(&mut tracker, "Acme Corp");
        tracker.start_timer(&id).unwrap();
        tracker.stop_timer(&id).unwrap();
        let entry_id = tracker.clients()[0].time_entries[0].id.clone();

        tracker.delete_time_entry(&entry_id).unwrap();
        assert!(tracker.clients()[0].time_entries.is_empty());
        assert!(tracker.pending_note().is_none());
    }

    #[test]
    fn import_skips_existing_names() {
        let mut tracker = tracker();
        add(&mut tracker, "Acme Corp");

        let summary = tracker
            .import_clients("Name,Rate\nacme corp, 75\nTech Startup, 100\nLocal Business, 50")
            .unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                format: ImportFormat::Csv,
                added: 2,
                skipped: 1
            }
        );
        assert_eq!(tracker.clients().len(), 3);
        let tech = tracker.clients().iter().find(|c| c.name == "Tech Startup").unwrap();
        assert_eq!(tech.hourly_rate, 100.0);
    }

    #[test]
    fn failed_reload_after_import_does_not_duplicate_on_retry() {
        let mut tracker = tracker();
        tracker
            .database()
            .store()
            .fail_next("select clients", RemoteError::Network("down".to_string()));

        let err = tracker
            .import_clients("Acme Corp, 75\nTech Startup, 100")
            .unwrap_err();
        assert!(matches!(err, Error::Remote(RemoteError::Network(_))));
        assert_eq!(tracker.clients().len(), 2);

        let summary = tracker
            .import_clients("Acme Corp, 75\nTech Startup, 100")
            .unwrap();
        assert_eq!(summary.added, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(tracker.database().store().rows(Table::Clients).len(), 2);
    }

    #[test]
    fn import_errors_are_reported_without_changes() {
        let mut tracker = tracker();
        let err = tracker.import_clients("[{\"name\": ").unwrap_err();
        assert!(matches!(err, Error::Import(ImportError::InvalidJson(_))));
        assert!(tracker.database().store().calls().is_empty());
    }

    #[test]
    fn exported_snapshot_imports_as_nothing_new() {
        let mut tracker = tracker();
        add(&mut tracker, "Acme Corp");
        add(&mut tracker, "Tech Startup");
        let snapshot = tracker.export_snapshot(Utc::now()).unwrap();

        let summary = tracker.import_clients(&snapshot).unwrap();
        assert_eq!(summary.format, ImportFormat::Json);
        assert_eq!(summary.added, 0);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn render_export_names_file_by_kind() {
        let mut tracker = tracker();
        let id = add(&mut tracker, "Acme Corp");
        tracker.start_timer(&id).unwrap();
        tracker.stop_timer(&id).unwrap();
        let now = Local::now();

        let (name, body) = tracker.render_export(ExportKind::Csv, now).unwrap();
        assert_eq!(name, export::csv_file_name(now));
        assert_eq!(body.lines().count(), 2);
        assert!(body.lines().nth(1).unwrap().starts_with("\"Acme Corp\",Active,"));
        assert_eq!(
            tracker.database().store().calls().last().map(String::as_str),
            Some("select time_entries")
        );

        let (name, body) = tracker.render_export(ExportKind::Json, now).unwrap();
        assert!(name.ends_with(".json"));
        assert!(body.contains("\"selectedClientId\""));
    }

    #[test]
    fn reset_all_removes_everything() {
        let mut tracker = tracker();
        let a = add(&mut tracker, "A");
        add(&mut tracker, "B");
        tracker.start_timer(&a).unwrap();

        tracker.reset_all().unwrap();
        assert!(tracker.clients().is_empty());
        assert_eq!(tracker.selected_id(), None);
        assert!(tracker.database().store().rows(Table::Clients).is_empty());
        assert!(tracker.database().store().rows(Table::TimeEntries).is_empty());
    }

    #[test]
    fn update_client_keeps_sanitized_values() {
        let mut tracker = tracker();
        let id = add(&mut tracker, "Acme Corp");
        tracker.update_client(&id, Some(" Acme Inc "), Some(-3.0)).unwrap();
        let client = tracker.selected_client().unwrap();
        assert_eq!(client.name, "Acme Inc");
        assert_eq!(client.hourly_rate, 0.0);
    }
}
