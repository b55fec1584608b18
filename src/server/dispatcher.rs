//! Dispatcher - the server core
//!
//! Owns the shared collections (change records, pending requests, the
//! outstanding transfer batch and the user roster), each behind its own
//! lock. Every mutation is validate-then-commit: the new collection is built
//! and saved first, and only swapped in once the save succeeded. Locks are
//! never held across an `.await`; notifications go out after release.
//!
//! Lock order: pending -> batch -> tracking.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::Services;
use super::batch::{BatchState, TransferBatch};
use super::registry::SessionRegistry;
use crate::activity_log::ActivityLog;
use crate::collaborators::notify::{
    SUBJECT_RELEASE_SUCCESS, SUBJECT_TRANSFER_REQUEST, SUBJECT_TRANSFER_SUBMITTED,
    SUBJECT_UNRECOGNIZED_USER,
};
use crate::collaborators::{FileSystemView, Notifier};
use crate::config::{AppConfig, NotifyConfig, StorageConfig};
use crate::core_types::{SessionId, TrackingNumber};
use crate::entity::{ChangeRecord, TransferRequest, User};
use crate::error::QarsError;
use crate::persistence::{InstructionMarker, SnapshotStore, TrackingCounter};
use crate::protocol::{ActionCode, CLAIM_SENTINEL, Payload, ResultCode};

// ============================================================
// Reply
// ============================================================

/// Result code and payload returned for one action
#[derive(Debug, Clone)]
pub struct Reply {
    pub code: ResultCode,
    pub payload: Payload,
}

impl Reply {
    pub fn new(code: ResultCode, payload: impl Into<Payload>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    pub fn success(payload: impl Into<Payload>) -> Self {
        Self::new(ResultCode::Success, payload)
    }

    pub fn error() -> Self {
        Self::new(ResultCode::Error, Payload::Null)
    }

    pub fn shutdown() -> Self {
        Self::new(ResultCode::Shutdown, Payload::Null)
    }

    /// `NoOp` for an empty listing, `Success` otherwise
    pub fn listing(items: Vec<Payload>) -> Self {
        let code = if items.is_empty() {
            ResultCode::NoOp
        } else {
            ResultCode::Success
        };
        Self::new(code, Payload::List(items))
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================
// Dispatcher
// ============================================================

pub struct Dispatcher {
    storage: StorageConfig,
    recipients: NotifyConfig,
    store: SnapshotStore,
    marker: InstructionMarker,
    server_track: TrackingNumber,
    tracking: Mutex<TrackingCounter>,
    change_records: Mutex<Vec<ChangeRecord>>,
    pending: Mutex<Vec<TransferRequest>>,
    batch: Mutex<Option<TransferBatch>>,
    users: Mutex<Vec<User>>,
    registry: Arc<SessionRegistry>,
    activity: ActivityLog,
    notifier: Arc<dyn Notifier>,
    fs: Arc<dyn FileSystemView>,
}

impl Dispatcher {
    /// Load every collection and recover any batch left by a previous run.
    ///
    /// A corrupt artifact or an unreadable tracking file fails startup.
    pub fn open(
        config: &AppConfig,
        services: &Services,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self, QarsError> {
        let storage = config.storage.clone();
        let store = SnapshotStore::new(&storage.data_dir);

        let mut tracking = TrackingCounter::load(
            storage.path(&storage.tracking_file),
            storage.default_tracking,
        )?;
        let change_records: Vec<ChangeRecord> = store.load(&storage.active_file)?;
        let pending: Vec<TransferRequest> = store.load(&storage.pending_file)?;
        let leftover: Vec<TransferRequest> = store.load(&storage.transfer_file)?;
        let users: Vec<User> = store.load(&storage.users_file)?;

        if let Some(max) = pending.iter().chain(leftover.iter()).map(|r| r.tracking()).max() {
            if tracking.ensure_after(max)? {
                warn!(tracking = max, "Tracking file behind stored requests, skipping ahead");
            }
        }

        let activity = ActivityLog::open(storage.path(&storage.activity_log))?;
        let marker = InstructionMarker::new(storage.path(&storage.instruction_file));
        let server_track = tracking.server_track();

        info!(
            change_records = change_records.len(),
            pending = pending.len(),
            leftover_batch = leftover.len(),
            users = users.len(),
            next_tracking = tracking.peek_next(),
            "Collections loaded"
        );

        let batch = (!leftover.is_empty()).then(|| TransferBatch::begin(leftover));
        let dispatcher = Self {
            storage,
            recipients: config.notify.clone(),
            store,
            marker,
            server_track,
            tracking: Mutex::new(tracking),
            change_records: Mutex::new(change_records),
            pending: Mutex::new(pending),
            batch: Mutex::new(batch),
            users: Mutex::new(users),
            registry,
            activity,
            notifier: services.notifier.clone(),
            fs: services.fs.clone(),
        };

        let recovered = dispatcher.fold_back_batch()?;
        if recovered > 0 {
            warn!(recovered, "Outstanding transfer batch returned to pending");
            dispatcher
                .activity
                .record(server_track, &format!("Recovered {} requests from unfinished transfer", recovered));
        }
        dispatcher.save_tracking();
        Ok(dispatcher)
    }

    /// Tracking id of the server process
    pub fn server_track(&self) -> TrackingNumber {
        self.server_track
    }

    /// Most recently assigned tracking number
    pub fn last_assigned(&self) -> TrackingNumber {
        lock(&self.tracking).last_assigned()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn change_records(&self) -> Vec<ChangeRecord> {
        lock(&self.change_records).clone()
    }

    pub fn pending(&self) -> Vec<TransferRequest> {
        lock(&self.pending).clone()
    }

    pub fn batch(&self) -> Option<TransferBatch> {
        lock(&self.batch).clone()
    }

    pub fn users(&self) -> Vec<User> {
        lock(&self.users).clone()
    }

    // ============================================================
    // Sessions
    // ============================================================

    /// Register a new connection under a fresh tracking id
    pub fn open_session(&self, peer: Option<SocketAddr>) -> Result<SessionId, QarsError> {
        let session = {
            let mut tracking = lock(&self.tracking);
            let session = tracking.allocate()?;
            if let Err(e) = tracking.save() {
                warn!(session, error = %e, "Tracking file not saved");
            }
            session
        };
        self.registry.add(session, peer);
        self.activity.record(session, "New connection accepted");
        Ok(session)
    }

    /// Drop a session whose handler is gone. Returns false if already dropped.
    pub fn close_session(&self, session: SessionId, reason: &str) -> bool {
        let removed = self.registry.remove(session);
        if removed {
            self.activity.record(session, reason);
        }
        removed
    }

    // ============================================================
    // Dispatch
    // ============================================================

    /// Apply one action. Failures become an `Error` reply; nothing is mutated.
    pub async fn dispatch(&self, session: SessionId, action: ActionCode, payload: Payload) -> Reply {
        let kind = payload.kind();
        let result = match action {
            ActionCode::Shutdown => Ok(self.client_shutdown(session)),
            ActionCode::GetTrackingNumber => {
                self.activity.record(session, "Tracking number requested");
                Ok(Reply::success(session))
            }
            ActionCode::ListChangeRecords => Ok(self.list_change_records(session)),
            ActionCode::ListPendingRequests => Ok(self.list_pending(session)),
            ActionCode::Add => self.add(session, payload).await,
            ActionCode::Delete => self.delete(session, payload),
            ActionCode::LoginName => self.login_name(session, payload).await,
            ActionCode::BeginOrClaimTransfer => self.begin_or_claim(session, payload).await,
            ActionCode::Log => self.log(session, payload),
            ActionCode::CheckWebCompileFlag => self.check_web_compile_flag(session, payload).await,
            ActionCode::SendEmail => self.send_email(session).await,
            ActionCode::ReloadUsers => self.reload_users(session),
            ActionCode::ListDirectory | ActionCode::DirectoryExists | ActionCode::GetImpactedFiles => {
                Err(QarsError::Validation(format!("{} is answered by the connection", action)))
            }
        };

        match result {
            Ok(reply) => {
                debug!(session, action = %action, result = %reply.code, "Action applied");
                reply
            }
            Err(e) => {
                warn!(
                    session,
                    action = %action,
                    payload = kind,
                    code = e.code(),
                    error = %e,
                    "Action failed"
                );
                Reply::new(e.result_code(), Payload::Null)
            }
        }
    }

    fn client_shutdown(&self, session: SessionId) -> Reply {
        self.close_session(session, "Client shut down");
        Reply::shutdown()
    }

    fn list_change_records(&self, session: SessionId) -> Reply {
        self.activity.record(session, "SCR list requested");
        let records = lock(&self.change_records).clone();
        Reply::listing(records.into_iter().map(Payload::from).collect())
    }

    fn list_pending(&self, session: SessionId) -> Reply {
        self.activity.record(session, "Request list requested");
        let requests = lock(&self.pending).clone();
        Reply::listing(requests.into_iter().map(Payload::from).collect())
    }

    fn log(&self, session: SessionId, payload: Payload) -> Result<Reply, QarsError> {
        let Payload::Str(message) = payload else {
            return Err(QarsError::Validation(format!("log expects a string, got {}", payload.kind())));
        };
        self.activity.record(session, &message);
        Ok(Reply::success(Payload::Null))
    }

    async fn check_web_compile_flag(&self, session: SessionId, payload: Payload) -> Result<Reply, QarsError> {
        self.activity.record(session, "Webspeed status requested");
        let Payload::Str(flag_file) = payload else {
            return Err(QarsError::Validation(format!(
                "web compile flag expects a path, got {}",
                payload.kind()
            )));
        };
        if self.fs.file_exists(&flag_file).await {
            Ok(Reply::success(true))
        } else {
            Ok(Reply::new(ResultCode::Error, false))
        }
    }

    // ============================================================
    // Add / Delete
    // ============================================================

    async fn add(&self, session: SessionId, payload: Payload) -> Result<Reply, QarsError> {
        self.activity.record(session, "Add requested");
        match payload {
            Payload::ChangeRecord(record) => self.add_change_record(session, record),
            Payload::Request(request) => self.add_request(session, request).await,
            other => Err(QarsError::Validation(format!("cannot add a {}", other.kind()))),
        }
    }

    fn add_change_record(&self, session: SessionId, mut record: ChangeRecord) -> Result<Reply, QarsError> {
        let mut records = lock(&self.change_records);
        let mut candidate = records.clone();

        let previous = match candidate.iter().position(|c| c.same_id(record.id())) {
            Some(index) => {
                let previous = candidate.remove(index);
                record.set_author(previous.author());
                Some(previous)
            }
            None => None,
        };
        let verb = if previous.is_some() { "updated" } else { "added" };
        let id = record.id().to_string();
        candidate.push(record);

        self.store.save(&self.storage.active_file, &candidate, false)?;
        *records = candidate;
        drop(records);

        self.activity.record(session, &format!("{} {}", id, verb));
        Ok(Reply::success(previous))
    }

    async fn add_request(&self, session: SessionId, mut request: TransferRequest) -> Result<Reply, QarsError> {
        let (previous, stored) = {
            let mut pending = lock(&self.pending);

            if !request.has_tracking() {
                let mut tracking = lock(&self.tracking);
                request.assign_tracking(tracking.allocate()?);
                if let Err(e) = tracking.save() {
                    warn!(session, error = %e, "Tracking file not saved");
                }
            } else {
                // only numbers this server handed out may be resubmitted
                let track = request.tracking();
                let issued = track < lock(&self.tracking).peek_next();
                if !issued && !pending.iter().any(|r| r.tracking() == track) {
                    return Err(QarsError::Validation(format!(
                        "tracking number {} was never assigned",
                        track
                    )));
                }
            }

            let mut candidate = pending.clone();
            let previous = candidate
                .iter()
                .position(|r| r.tracking() == request.tracking())
                .map(|index| candidate.remove(index));
            candidate.push(request.clone());

            self.store.save(&self.storage.pending_file, &candidate, false)?;
            *pending = candidate;
            (previous, request)
        };

        self.activity
            .record(session, &format!("Request {} submitted", stored.tracking()));

        let recipients = self.request_recipients([stored.requestor()], stored.delta_forced_compile());
        self.deliver(session, SUBJECT_TRANSFER_REQUEST, &recipients, &stored.render())
            .await;
        Ok(Reply::success(previous))
    }

    fn delete(&self, session: SessionId, payload: Payload) -> Result<Reply, QarsError> {
        self.activity.record(session, "Delete requested");
        match payload {
            Payload::ChangeRecord(record) => {
                let mut records = lock(&self.change_records);
                let index = records
                    .iter()
                    .position(|c| c.same_id(record.id()))
                    .ok_or_else(|| QarsError::NotFound(format!("change record {}", record.id())))?;
                let mut candidate = records.clone();
                let removed = candidate.remove(index);

                self.store.save(&self.storage.active_file, &candidate, true)?;
                *records = candidate;
                drop(records);

                self.activity.record(session, &format!("{} deleted", removed.id()));
                Ok(Reply::success(removed))
            }
            Payload::Request(request) => {
                let track = request.tracking();
                let mut pending = lock(&self.pending);
                let index = pending
                    .iter()
                    .position(|r| r.tracking() == track)
                    .ok_or_else(|| QarsError::NotFound(format!("request {}", track)))?;
                let mut candidate = pending.clone();
                let removed = candidate.remove(index);

                self.store.save(&self.storage.pending_file, &candidate, true)?;
                *pending = candidate;
                drop(pending);

                self.activity.record(session, &format!("Request {} deleted", track));
                Ok(Reply::success(removed))
            }
            other => Err(QarsError::Validation(format!("cannot delete a {}", other.kind()))),
        }
    }

    // ============================================================
    // Users
    // ============================================================

    async fn login_name(&self, session: SessionId, payload: Payload) -> Result<Reply, QarsError> {
        let Payload::Str(login) = payload else {
            return Err(QarsError::Validation(format!("login expects a string, got {}", payload.kind())));
        };

        let known = lock(&self.users).iter().find(|u| u.login == login).cloned();
        let user = known.unwrap_or_else(|| User::unknown(&login));
        self.registry.set_login(session, &login);
        self.activity.record(session, &format!("Login {}", login));

        if !user.is_recognized() {
            info!(session, login = %login, "Unrecognized user");
            let body = format!(
                "{} attempted to use QARS (session {}) and is not in the user list.\n",
                login, session
            );
            let recipients = self.admin_recipients();
            self.deliver(session, SUBJECT_UNRECOGNIZED_USER, &recipients, &body)
                .await;
        }
        Ok(Reply::success(user))
    }

    fn reload_users(&self, session: SessionId) -> Result<Reply, QarsError> {
        self.activity.record(session, "User update requested");
        let roster: Vec<User> = self.store.load(&self.storage.users_file)?;
        let count = roster.len();
        *lock(&self.users) = roster;
        self.activity.record(session, "User file updated");
        info!(session, users = count, "Roster reloaded");
        Ok(Reply::success(count as i32))
    }

    // ============================================================
    // Transfer
    // ============================================================

    async fn begin_or_claim(&self, session: SessionId, payload: Payload) -> Result<Reply, QarsError> {
        match payload {
            Payload::Int(CLAIM_SENTINEL) => self.claim_transfer(session),
            Payload::List(items) => self.begin_transfer(session, items).await,
            other => Err(QarsError::Validation(format!(
                "transfer expects a request list or the claim sentinel, got {}",
                other.kind()
            ))),
        }
    }

    async fn begin_transfer(&self, session: SessionId, items: Vec<Payload>) -> Result<Reply, QarsError> {
        self.activity.record(session, "Xfer requested");
        let (instructions, count) = {
            let mut pending = lock(&self.pending);
            let mut batch = lock(&self.batch);

            if let Some(outstanding) = batch.as_ref() {
                return Err(QarsError::Conflict(format!(
                    "transfer of {:?} is still {}",
                    outstanding.trackings(),
                    outstanding.state()
                )));
            }

            let wanted = Payload::List(items)
                .into_requests()
                .ok_or_else(|| QarsError::Validation("transfer list holds non-request elements".into()))?;
            if wanted.is_empty() {
                return Err(QarsError::Validation("transfer list is empty".into()));
            }

            let mut seen = HashSet::new();
            let mut chosen = Vec::with_capacity(wanted.len());
            for request in &wanted {
                let track = request.tracking();
                if !seen.insert(track) {
                    return Err(QarsError::Validation(format!("request {} listed twice", track)));
                }
                let stored = pending
                    .iter()
                    .find(|r| r.tracking() == track)
                    .ok_or_else(|| QarsError::NotFound(format!("request {} is not pending", track)))?;
                chosen.push(stored.clone());
            }
            let candidate: Vec<TransferRequest> = pending
                .iter()
                .filter(|r| !seen.contains(&r.tracking()))
                .cloned()
                .collect();

            let begun = TransferBatch::begin(chosen);
            let instructions = begun.instructions();

            self.marker.create(&instructions)?;
            if let Err(e) = self.store.save(&self.storage.pending_file, &candidate, true) {
                self.discard_marker(session);
                return Err(e);
            }
            if let Err(e) = self.store.save(&self.storage.transfer_file, begun.requests(), true) {
                self.discard_marker(session);
                if let Err(restore) = self.store.save(&self.storage.pending_file, pending.as_slice(), true) {
                    warn!(session, error = %restore, "Pending snapshot not restored");
                }
                return Err(e);
            }

            let trackings = begun.trackings();
            *pending = candidate;
            *batch = Some(begun);
            info!(session, trackings = ?trackings, "Transfer begun");
            self.activity.record(
                session,
                &format!(
                    "Transfer of {}",
                    trackings.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",")
                ),
            );
            (instructions, trackings.len())
        };

        let recipients = self.admin_recipients();
        self.deliver(session, SUBJECT_TRANSFER_SUBMITTED, &recipients, &instructions)
            .await;
        Ok(Reply::success(count as i32))
    }

    fn claim_transfer(&self, session: SessionId) -> Result<Reply, QarsError> {
        self.activity.record(session, "Xfer claim requested");
        let pending = lock(&self.pending);
        let mut batch = lock(&self.batch);

        let outstanding = batch
            .as_mut()
            .ok_or_else(|| QarsError::Conflict("no transfer has been begun".into()))?;
        if outstanding.state() != BatchState::Begun {
            return Err(QarsError::Conflict(format!("transfer already {}", outstanding.state())));
        }

        self.store.save(&self.storage.pending_file, pending.as_slice(), true)?;
        outstanding.claim();
        let requests = outstanding.requests().to_vec();
        info!(session, requests = requests.len(), "Transfer claimed");
        self.activity.record(session, "Xfer claimed");
        Ok(Reply::success(requests))
    }

    async fn send_email(&self, session: SessionId) -> Result<Reply, QarsError> {
        self.activity.record(session, "Email requested");

        let finished = {
            let _pending = lock(&self.pending);
            let mut batch = lock(&self.batch);

            // removing the marker is what claims the report
            match self.marker.remove() {
                Ok(true) => {}
                Ok(false) => {
                    return Err(QarsError::Conflict("no transfer instructions outstanding".into()));
                }
                Err(e) => {
                    self.activity.record(session, "Unable to delete instruction file");
                    return Err(e);
                }
            }
            if let Err(e) = self.store.remove(&self.storage.transfer_file) {
                warn!(session, error = %e, "Transfer snapshot not removed");
            }
            batch.take()
        };

        let delta_forced = finished.as_ref().is_some_and(TransferBatch::delta_forced);
        let requests = finished.map(TransferBatch::into_requests).unwrap_or_default();
        let recipients = self.request_recipients(requests.iter().map(|r| r.requestor()), delta_forced);
        let mut body = String::from("The following requests were released to QA.\n");
        for request in &requests {
            body.push_str(&request.render());
        }
        info!(session, requests = requests.len(), "Transfer completed");
        self.deliver(session, SUBJECT_RELEASE_SUCCESS, &recipients, &body)
            .await;
        Ok(Reply::success(Payload::Null))
    }

    /// Return an outstanding batch to pending and remove its artifacts.
    ///
    /// Used at startup and at shutdown; running it twice is harmless.
    fn fold_back_batch(&self) -> Result<usize, QarsError> {
        let mut pending = lock(&self.pending);
        let mut batch = lock(&self.batch);

        let Some(outstanding) = batch.as_ref() else {
            if self.marker.remove()? {
                warn!("Stale instruction marker removed");
            }
            self.store.remove(&self.storage.transfer_file)?;
            return Ok(0);
        };

        let mut candidate = pending.clone();
        let mut returned = 0;
        for request in outstanding.requests() {
            if !candidate.iter().any(|r| r.tracking() == request.tracking()) {
                candidate.push(request.clone());
                returned += 1;
            }
        }
        self.store.save(&self.storage.pending_file, &candidate, true)?;
        *pending = candidate;
        *batch = None;

        self.marker.remove()?;
        self.store.remove(&self.storage.transfer_file)?;
        Ok(returned)
    }

    fn discard_marker(&self, session: SessionId) {
        if let Err(e) = self.marker.remove() {
            warn!(session, error = %e, "Instruction marker not rolled back");
        }
    }

    // ============================================================
    // Shutdown
    // ============================================================

    /// Fold back any outstanding batch and flush every collection
    pub fn shutdown(&self) -> Result<(), QarsError> {
        let mut failures = Vec::new();

        match self.fold_back_batch() {
            Ok(0) => {}
            Ok(returned) => info!(returned, "Outstanding transfer returned to pending"),
            Err(e) => failures.push(e),
        }
        {
            let records = lock(&self.change_records);
            if let Err(e) = self.store.save(&self.storage.active_file, records.as_slice(), true) {
                failures.push(e);
            }
        }
        {
            let pending = lock(&self.pending);
            if let Err(e) = self.store.save(&self.storage.pending_file, pending.as_slice(), true) {
                failures.push(e);
            }
        }
        self.save_tracking();
        self.activity.record(self.server_track, "Server died");

        match failures.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn save_tracking(&self) {
        if let Err(e) = lock(&self.tracking).save() {
            warn!(error = %e, "Tracking file not saved");
        }
    }

    // ============================================================
    // Notifications
    // ============================================================

    fn admin_recipients(&self) -> Vec<String> {
        dedup_recipients([self.recipients.super_admin.as_str()])
    }

    fn request_recipients<'a>(
        &'a self,
        requestors: impl IntoIterator<Item = &'a str>,
        delta_forced: bool,
    ) -> Vec<String> {
        let qa = self.recipients.qa_recipients.iter().map(String::as_str);
        let dba = self
            .recipients
            .dba_recipients
            .iter()
            .map(String::as_str)
            .filter(|_| delta_forced);
        dedup_recipients(qa.chain(requestors).chain(dba))
    }

    async fn deliver(&self, session: SessionId, subject: &str, recipients: &[String], body: &str) {
        if recipients.is_empty() {
            debug!(session, subject, "No recipients, notification skipped");
            return;
        }
        if let Err(e) = self.notifier.notify(subject, recipients, body).await {
            warn!(session, subject, notifier = self.notifier.name(), error = %e, "Notification failed");
        }
    }
}

fn dedup_recipients<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LocalFileSystem, RecordingNotifier, StaticImpactAnalyzer};
    use crate::entity::{Category, ReleaseFile, SecurityLevel};
    use std::fs;

    struct Fixture {
        dir: String,
        config: AppConfig,
        notifier: Arc<RecordingNotifier>,
        services: Services,
    }

    impl Fixture {
        fn new(tag: &str) -> Self {
            let dir = format!("target/test_dispatcher_{}_{}", tag, std::process::id());
            let _ = fs::remove_dir_all(&dir);
            fs::create_dir_all(&dir).unwrap();

            let mut config = AppConfig::default();
            config.storage.data_dir = dir.clone();
            config.notify.qa_recipients = vec!["qa".into()];
            config.notify.dba_recipients = vec!["dba".into()];
            config.notify.super_admin = "root".into();

            let notifier = Arc::new(RecordingNotifier::new());
            let services = Services {
                notifier: notifier.clone(),
                fs: Arc::new(LocalFileSystem),
                impact: Arc::new(StaticImpactAnalyzer::new()),
            };
            Self {
                dir,
                config,
                notifier,
                services,
            }
        }

        fn open(&self) -> Dispatcher {
            Dispatcher::open(&self.config, &self.services, Arc::new(SessionRegistry::new())).unwrap()
        }

        fn path(&self, name: &str) -> std::path::PathBuf {
            self.config.storage.path(name)
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn record(id: &str, author: &str) -> ChangeRecord {
        let mut scr = ChangeRecord::new(id, author);
        let mut file = ReleaseFile::with_defaults("orders.p", 10, Category::Source);
        file.include = true;
        scr.add_file(file);
        scr
    }

    fn request(requestor: &str) -> TransferRequest {
        TransferRequest::new(Some(&record("CR100", requestor)), requestor)
    }

    async fn submit(d: &Dispatcher, session: SessionId, r: TransferRequest) -> TrackingNumber {
        let reply = d.dispatch(session, ActionCode::Add, r.into()).await;
        assert_eq!(reply.code, ResultCode::Success);
        d.last_assigned()
    }

    #[tokio::test]
    async fn test_add_change_record_keeps_original_author() {
        let fx = Fixture::new("author");
        let d = fx.open();
        let s = d.open_session(None).unwrap();

        let reply = d.dispatch(s, ActionCode::Add, record("CR100", "alice").into()).await;
        assert_eq!(reply.code, ResultCode::Success);
        assert!(reply.payload.is_null());

        let reply = d.dispatch(s, ActionCode::Add, record("cr100", "mallory").into()).await;
        assert_eq!(reply.code, ResultCode::Success);
        match reply.payload {
            Payload::ChangeRecord(previous) => assert_eq!(previous.author(), "alice"),
            other => panic!("unexpected {}", other.kind()),
        }

        let records = d.change_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].author(), "alice");
    }

    #[tokio::test]
    async fn test_tracking_assignment_and_replacement() {
        let fx = Fixture::new("tracking");
        let d = fx.open();
        let s = d.open_session(None).unwrap();

        let before = d.last_assigned();
        let assigned = submit(&d, s, request("alice")).await;
        assert_eq!(assigned, before + 1);

        let stored = d.pending().into_iter().next().unwrap();
        assert_eq!(stored.tracking(), assigned);

        let reply = d.dispatch(s, ActionCode::Add, stored.clone().into()).await;
        assert_eq!(reply.code, ResultCode::Success);
        match reply.payload {
            Payload::Request(previous) => assert_eq!(previous.tracking(), assigned),
            other => panic!("unexpected {}", other.kind()),
        }
        assert_eq!(d.pending().len(), 1);
        assert_eq!(d.last_assigned(), assigned);

        // deleted numbers are never reused
        d.dispatch(s, ActionCode::Delete, stored.into()).await;
        let next = submit(&d, s, request("bob")).await;
        assert!(next > assigned);
    }

    #[tokio::test]
    async fn test_request_notifications() {
        let fx = Fixture::new("notify");
        let d = fx.open();
        let s = d.open_session(None).unwrap();

        submit(&d, s, request("alice")).await;
        let mut forced = request("bob");
        forced.add_file(ReleaseFile::new("orders.df", 1, Category::Delta));
        submit(&d, s, forced).await;

        let sent = fx.notifier.with_subject(SUBJECT_TRANSFER_REQUEST);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].recipients, vec!["qa", "alice"]);
        assert_eq!(sent[1].recipients, vec!["qa", "bob", "dba"]);
        assert!(sent[0].body.contains("CR NUMBER: CR100"));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_action() {
        let fx = Fixture::new("notify_fail");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        fx.notifier.set_fail(true);

        let reply = d.dispatch(s, ActionCode::Add, request("alice").into()).await;
        assert_eq!(reply.code, ResultCode::Success);
        assert_eq!(d.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_error_and_leaves_snapshot() {
        let fx = Fixture::new("delete_missing");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        d.dispatch(s, ActionCode::Add, record("CR100", "alice").into()).await;
        let before = fs::read(fx.path("qars.active")).unwrap();

        let reply = d.dispatch(s, ActionCode::Delete, record("CR999", "x").into()).await;
        assert_eq!(reply.code, ResultCode::Error);
        assert_eq!(fs::read(fx.path("qars.active")).unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_last_record_force_saves_empty() {
        let fx = Fixture::new("delete_last");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        d.dispatch(s, ActionCode::Add, record("CR100", "alice").into()).await;

        let reply = d.dispatch(s, ActionCode::Delete, record("CR100", "x").into()).await;
        assert_eq!(reply.code, ResultCode::Success);
        drop(d);

        let reopened = fx.open();
        assert!(reopened.change_records().is_empty());
    }

    #[tokio::test]
    async fn test_listing_codes() {
        let fx = Fixture::new("listing");
        let d = fx.open();
        let s = d.open_session(None).unwrap();

        let reply = d.dispatch(s, ActionCode::ListPendingRequests, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::NoOp);
        assert_eq!(reply.payload.as_list().map(|l| l.len()), Some(0));

        submit(&d, s, request("alice")).await;
        let reply = d.dispatch(s, ActionCode::ListPendingRequests, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::Success);
        assert_eq!(reply.payload.into_requests().map(|l| l.len()), Some(1));

        let reply = d.dispatch(s, ActionCode::ListChangeRecords, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::NoOp);
    }

    #[tokio::test]
    async fn test_wrong_payload_kinds_are_errors() {
        let fx = Fixture::new("kinds");
        let d = fx.open();
        let s = d.open_session(None).unwrap();

        for (action, payload) in [
            (ActionCode::Add, Payload::Int(3)),
            (ActionCode::Delete, Payload::Str("CR100".into())),
            (ActionCode::LoginName, Payload::Null),
            (ActionCode::Log, Payload::Bool(true)),
            (ActionCode::BeginOrClaimTransfer, Payload::Int(3)),
            (ActionCode::CheckWebCompileFlag, Payload::Int(1)),
            (ActionCode::ListDirectory, Payload::Str(".".into())),
        ] {
            let reply = d.dispatch(s, action, payload).await;
            assert_eq!(reply.code, ResultCode::Error, "{}", action);
        }
        assert!(d.change_records().is_empty());
        assert!(d.pending().is_empty());
    }

    #[tokio::test]
    async fn test_login_known_and_unknown() {
        let fx = Fixture::new("login");
        SnapshotStore::new(&fx.dir)
            .save(
                ".userxref",
                &[
                    User::new("amy", "amyx").with_security(SecurityLevel::Administrator),
                    User::new("ned", ""),
                ],
                false,
            )
            .unwrap();
        let d = fx.open();
        let s = d.open_session(None).unwrap();

        let reply = d.dispatch(s, ActionCode::LoginName, "amy".into()).await;
        assert_eq!(reply.code, ResultCode::Success);
        match reply.payload {
            Payload::User(u) => assert_eq!(u.security, Some(SecurityLevel::Administrator)),
            other => panic!("unexpected {}", other.kind()),
        }
        assert!(fx.notifier.with_subject(SUBJECT_UNRECOGNIZED_USER).is_empty());

        for login in ["ghost", "ned"] {
            let reply = d.dispatch(s, ActionCode::LoginName, login.into()).await;
            assert_eq!(reply.code, ResultCode::Success);
        }
        let alerts = fx.notifier.with_subject(SUBJECT_UNRECOGNIZED_USER);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].recipients, vec!["root"]);
        assert_eq!(d.registry().get(s).and_then(|i| i.login), Some("ned".to_string()));
    }

    #[tokio::test]
    async fn test_reload_users_keeps_roster_on_failure() {
        let fx = Fixture::new("reload");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        let store = SnapshotStore::new(&fx.dir);

        store.save(".userxref", &[User::new("amy", "amyx")], false).unwrap();
        let reply = d.dispatch(s, ActionCode::ReloadUsers, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::Success);
        assert_eq!(d.users().len(), 1);

        fs::write(fx.path(".userxref"), b"garbage").unwrap();
        let reply = d.dispatch(s, ActionCode::ReloadUsers, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::Error);
        assert_eq!(d.users().len(), 1);
    }

    #[tokio::test]
    async fn test_begin_claim_send_email() {
        let fx = Fixture::new("transfer");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        let t1 = submit(&d, s, request("alice")).await;
        let t2 = submit(&d, s, request("bob")).await;
        let t3 = submit(&d, s, request("carol")).await;
        let pending = d.pending();

        let begin: Payload = vec![pending[0].clone(), pending[1].clone()].into();
        let reply = d.dispatch(s, ActionCode::BeginOrClaimTransfer, begin).await;
        assert_eq!(reply.code, ResultCode::Success);
        assert!(fx.path("qa_rel").exists());
        assert!(fx.path("qars.transfer").exists());
        assert_eq!(d.pending().iter().map(|r| r.tracking()).collect::<Vec<_>>(), vec![t3]);
        assert_eq!(d.batch().map(|b| b.trackings()), Some(vec![t1, t2]));
        assert_eq!(fx.notifier.with_subject(SUBJECT_TRANSFER_SUBMITTED).len(), 1);

        // a second begin is refused and changes nothing
        let again: Payload = vec![pending[2].clone()].into();
        let reply = d.dispatch(s, ActionCode::BeginOrClaimTransfer, again).await;
        assert_eq!(reply.code, ResultCode::Error);
        assert_eq!(d.pending().len(), 1);
        assert_eq!(d.batch().map(|b| b.trackings()), Some(vec![t1, t2]));

        let reply = d
            .dispatch(s, ActionCode::BeginOrClaimTransfer, Payload::Int(CLAIM_SENTINEL))
            .await;
        assert_eq!(reply.code, ResultCode::Success);
        assert_eq!(reply.payload.into_requests().map(|r| r.len()), Some(2));
        assert_eq!(d.batch().map(|b| b.state()), Some(BatchState::Claimed));

        let reply = d
            .dispatch(s, ActionCode::BeginOrClaimTransfer, Payload::Int(CLAIM_SENTINEL))
            .await;
        assert_eq!(reply.code, ResultCode::Error);

        let reply = d.dispatch(s, ActionCode::SendEmail, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::Success);
        assert!(!fx.path("qa_rel").exists());
        assert!(!fx.path("qars.transfer").exists());
        assert!(d.batch().is_none());
        let done = fx.notifier.with_subject(SUBJECT_RELEASE_SUCCESS);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].recipients, vec!["qa", "alice", "bob"]);

        let reply = d.dispatch(s, ActionCode::SendEmail, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::Error);
    }

    #[tokio::test]
    async fn test_delta_forced_release_copies_dba() {
        let fx = Fixture::new("release_dba");
        let d = fx.open();
        let s = d.open_session(None).unwrap();

        let mut forced = request("bob");
        forced.add_file(ReleaseFile::new("orders.df", 1, Category::Delta));
        submit(&d, s, forced).await;
        let begin: Payload = d.pending().into();
        d.dispatch(s, ActionCode::BeginOrClaimTransfer, begin).await;

        let reply = d.dispatch(s, ActionCode::SendEmail, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::Success);
        let done = fx.notifier.with_subject(SUBJECT_RELEASE_SUCCESS);
        assert_eq!(done[0].recipients, vec!["qa", "bob", "dba"]);
    }

    #[tokio::test]
    async fn test_unissued_tracking_number_is_rejected() {
        let fx = Fixture::new("forged");
        let d = fx.open();
        let s = d.open_session(None).unwrap();

        let ahead = d.last_assigned() + 2;
        let forged = TransferRequest::with_tracking(Some(&record("CR100", "eve")), "eve", ahead);
        let reply = d.dispatch(s, ActionCode::Add, forged.into()).await;
        assert_eq!(reply.code, ResultCode::Error);
        assert!(d.pending().is_empty());

        // the numbers that were skipped still go to real submissions
        let first = submit(&d, s, request("alice")).await;
        let second = submit(&d, s, request("bob")).await;
        assert_eq!(second, ahead);
        let owners: Vec<_> = d.pending().iter().map(|r| (r.tracking(), r.requestor().to_string())).collect();
        assert_eq!(owners, vec![(first, "alice".to_string()), (second, "bob".to_string())]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reports_release_once() {
        let fx = Fixture::new("double_report");
        let d = Arc::new(fx.open());
        let s = d.open_session(None).unwrap();

        for round in 1..=25 {
            submit(&d, s, request("alice")).await;
            let begin: Payload = d.pending().into();
            let reply = d.dispatch(s, ActionCode::BeginOrClaimTransfer, begin).await;
            assert_eq!(reply.code, ResultCode::Success);

            let reports: Vec<_> = (0..2)
                .map(|_| {
                    let d = d.clone();
                    tokio::spawn(async move { d.dispatch(s, ActionCode::SendEmail, Payload::Null).await })
                })
                .collect();
            let mut successes = 0;
            for report in reports {
                if report.await.unwrap().code == ResultCode::Success {
                    successes += 1;
                }
            }
            assert_eq!(successes, 1);
            assert_eq!(fx.notifier.with_subject(SUBJECT_RELEASE_SUCCESS).len(), round);
        }
    }

    #[tokio::test]
    async fn test_begin_validation() {
        let fx = Fixture::new("begin_validation");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        submit(&d, s, request("alice")).await;
        let stored = d.pending()[0].clone();

        let empty = Payload::List(Vec::new());
        let unknown: Payload = vec![TransferRequest::with_tracking(None, "x", 99999)].into();
        let mixed = Payload::List(vec![stored.clone().into(), Payload::Int(1)]);
        let twice: Payload = vec![stored.clone(), stored].into();
        for payload in [empty, unknown, mixed, twice] {
            let reply = d.dispatch(s, ActionCode::BeginOrClaimTransfer, payload).await;
            assert_eq!(reply.code, ResultCode::Error);
        }
        assert_eq!(d.pending().len(), 1);
        assert!(d.batch().is_none());
        assert!(!fx.path("qa_rel").exists());

        let reply = d
            .dispatch(s, ActionCode::BeginOrClaimTransfer, Payload::Int(CLAIM_SENTINEL))
            .await;
        assert_eq!(reply.code, ResultCode::Error);
    }

    #[tokio::test]
    async fn test_web_compile_flag() {
        let fx = Fixture::new("webflag");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        let flag = fx.path("web.ok");

        let reply = d
            .dispatch(s, ActionCode::CheckWebCompileFlag, flag.display().to_string().into())
            .await;
        assert_eq!(reply.code, ResultCode::Error);
        assert_eq!(reply.payload.as_bool(), Some(false));

        fs::write(&flag, b"").unwrap();
        let reply = d
            .dispatch(s, ActionCode::CheckWebCompileFlag, flag.display().to_string().into())
            .await;
        assert_eq!(reply.code, ResultCode::Success);
        assert_eq!(reply.payload.as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_shutdown_folds_batch_back() {
        let fx = Fixture::new("shutdown");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        submit(&d, s, request("alice")).await;
        submit(&d, s, request("bob")).await;
        let begin: Payload = d.pending().into();
        d.dispatch(s, ActionCode::BeginOrClaimTransfer, begin).await;
        assert!(d.pending().is_empty());

        d.shutdown().unwrap();
        assert_eq!(d.pending().len(), 2);
        assert!(d.batch().is_none());
        assert!(!fx.path("qa_rel").exists());

        // a second shutdown is harmless
        d.shutdown().unwrap();
        drop(d);
        let reopened = fx.open();
        assert_eq!(reopened.pending().len(), 2);
    }

    #[tokio::test]
    async fn test_startup_recovers_unfinished_transfer() {
        let fx = Fixture::new("recover");
        let last = {
            let d = fx.open();
            let s = d.open_session(None).unwrap();
            submit(&d, s, request("alice")).await;
            let begin: Payload = d.pending().into();
            d.dispatch(s, ActionCode::BeginOrClaimTransfer, begin).await;
            d.last_assigned()
            // no shutdown: simulated crash
        };
        assert!(fx.path("qars.transfer").exists());

        let d = fx.open();
        assert_eq!(d.pending().len(), 1);
        assert!(d.batch().is_none());
        assert!(!fx.path("qa_rel").exists());
        assert!(!fx.path("qars.transfer").exists());
        assert!(d.open_session(None).unwrap() > last);
    }

    #[tokio::test]
    async fn test_client_shutdown_removes_session() {
        let fx = Fixture::new("client_shutdown");
        let d = fx.open();
        let s = d.open_session(None).unwrap();
        assert!(d.registry().contains(s));

        let reply = d.dispatch(s, ActionCode::Shutdown, Payload::Null).await;
        assert_eq!(reply.code, ResultCode::Shutdown);
        assert!(!d.registry().contains(s));
        assert!(!d.close_session(s, "again"));
    }

    #[test]
    fn test_corrupt_artifact_fails_startup() {
        let fx = Fixture::new("corrupt");
        SnapshotStore::new(&fx.dir)
            .save("qars.active", &[User::new("amy", "amyx")], false)
            .unwrap();
        let err = Dispatcher::open(&fx.config, &fx.services, Arc::new(SessionRegistry::new()))
            .err()
            .unwrap();
        assert_eq!(err.code(), "CORRUPT_ARTIFACT");
    }

    #[test]
    fn test_dedup_recipients() {
        assert_eq!(dedup_recipients(["qa", "", "alice", "qa", " bob "]), vec!["qa", "alice", "bob"]);
    }
}
