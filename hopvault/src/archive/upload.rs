//! Mirroring snapshots to a remote upload target.
//!
//! [`MirrorStore`] wraps a local store and queues every successful write
//! and removal for an [`Uploader`], which replays them against an
//! [`UploadTarget`] on its own task. Drift detection and retention only
//! ever read the local store, so a slow or failing upload target never
//! delays or fails a capture.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use russh_sftp::client::SftpSession;
use secrecy::SecretString;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use super::store::{EntryKey, SnapshotStore, entry_file_name};
use crate::credentials::copy_secret;
use crate::error::{ArchiveError, Result};
use crate::events::{CycleEvent, EventSink, LogSink};
use crate::transport::{AlgorithmProfile, HostKeyVerification, SshConfig, SshTransport};

/// One queued mirror operation.
#[derive(Debug)]
pub enum Upload {
    Put { key: EntryKey, blob: Vec<u8> },
    Remove { key: EntryKey },

    /// Answered once everything queued before it has been attempted.
    Flush(oneshot::Sender<()>),
}

/// Sending side of the upload queue.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    sender: mpsc::UnboundedSender<Upload>,
}

/// Create an upload queue and the receiver an [`Uploader`] drains.
pub fn upload_queue() -> (UploadQueue, mpsc::UnboundedReceiver<Upload>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (UploadQueue { sender }, receiver)
}

impl UploadQueue {
    fn submit(&self, upload: Upload) {
        if let Err(rejected) = self.sender.send(upload) {
            warn!("upload task has stopped, dropping {:?}", describe(&rejected.0));
        }
    }

    /// Wait until every upload queued so far has been attempted.
    ///
    /// Returns false if the uploader is gone.
    pub async fn flush(&self) -> bool {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Upload::Flush(done)).is_err() {
            return false;
        }
        wait.await.is_ok()
    }
}

fn describe(upload: &Upload) -> String {
    match upload {
        Upload::Put { key, .. } => format!("put {}", key),
        Upload::Remove { key } => format!("remove {}", key),
        Upload::Flush(_) => "flush".to_string(),
    }
}

/// A store whose changes are mirrored to an upload target.
pub struct MirrorStore<S> {
    local: S,
    queue: UploadQueue,
}

impl<S: SnapshotStore> MirrorStore<S> {
    pub fn new(local: S, queue: UploadQueue) -> Self {
        Self { local, queue }
    }

    pub fn local(&self) -> &S {
        &self.local
    }
}

impl<S: SnapshotStore> SnapshotStore for MirrorStore<S> {
    fn put(&self, key: &EntryKey, blob: &[u8]) -> Result<()> {
        self.local.put(key, blob)?;
        self.queue.submit(Upload::Put {
            key: key.clone(),
            blob: blob.to_vec(),
        });
        Ok(())
    }

    fn get(&self, key: &EntryKey) -> Result<Vec<u8>> {
        self.local.get(key)
    }

    fn list(&self, device: &str) -> Result<Vec<DateTime<Utc>>> {
        self.local.list(device)
    }

    fn devices(&self) -> Result<Vec<String>> {
        self.local.devices()
    }

    fn remove(&self, key: &EntryKey) -> Result<()> {
        self.local.remove(key)?;
        self.queue.submit(Upload::Remove { key: key.clone() });
        Ok(())
    }
}

/// Where mirrored snapshots go.
pub trait UploadTarget: Send {
    fn put(&mut self, path: &str, blob: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Removing a path that does not exist is not an error.
    fn remove(&mut self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Forget any cached connection after a failure.
    fn reset(&mut self) {}
}

/// Remote path of `key` under `root`, laid out like [`FsStore`](super::FsStore).
pub fn remote_path(root: &str, key: &EntryKey) -> String {
    format!("{}/{}/{}", root.trim_end_matches('/'), key.device, entry_file_name(key))
}

/// What an uploader did before its queue closed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub uploaded: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Replays queued uploads against `target`, one at a time.
pub struct Uploader<T> {
    target: T,
    root: String,
    events: Arc<dyn EventSink>,
}

impl<T: UploadTarget> Uploader<T> {
    pub fn new(target: T, root: impl Into<String>) -> Self {
        Self {
            target,
            root: root.into(),
            events: Arc::new(LogSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Run until every [`UploadQueue`] is dropped.
    ///
    /// Each operation gets a second attempt on a fresh connection before
    /// it is reported failed and dropped.
    pub async fn run(mut self, mut uploads: mpsc::UnboundedReceiver<Upload>) -> UploadStats {
        let mut stats = UploadStats::default();

        while let Some(upload) = uploads.recv().await {
            let (key, removing) = match upload {
                Upload::Flush(done) => {
                    let _ = done.send(());
                    continue;
                }
                Upload::Put { ref key, .. } => (key.clone(), false),
                Upload::Remove { ref key } => (key.clone(), true),
            };

            let path = remote_path(&self.root, &key);
            let result = match self.attempt(&upload, &path).await {
                Err(e) => {
                    debug!("upload of {} failed ({}), reconnecting", key, e);
                    self.target.reset();
                    self.attempt(&upload, &path).await
                }
                ok => ok,
            };

            match result {
                Ok(()) if removing => {
                    debug!("removed mirrored {}", path);
                    stats.removed += 1;
                }
                Ok(()) => {
                    self.events.emit(&CycleEvent::SnapshotUploaded { entry: key, path });
                    stats.uploaded += 1;
                }
                Err(e) => {
                    self.target.reset();
                    self.events.emit(&CycleEvent::UploadFailed {
                        entry: key,
                        message: e.to_string(),
                    });
                    stats.failed += 1;
                }
            }
        }

        debug!("upload queue closed: {:?}", stats);
        stats
    }

    async fn attempt(&mut self, upload: &Upload, path: &str) -> Result<()> {
        match upload {
            Upload::Put { blob, .. } => self.target.put(path, blob).await,
            Upload::Remove { .. } => self.target.remove(path).await,
            Upload::Flush(_) => Ok(()),
        }
    }
}

/// Connection details of an SFTP upload target.
#[derive(Debug)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,

    /// Directory snapshots are mirrored under.
    pub remote_dir: String,

    pub timeout: Duration,
    pub host_key_verification: HostKeyVerification,
    pub known_hosts_path: Option<PathBuf>,
    pub algorithms: AlgorithmProfile,
}

impl Clone for SftpSettings {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: copy_secret(&self.password),
            remote_dir: self.remote_dir.clone(),
            timeout: self.timeout,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path.clone(),
            algorithms: self.algorithms.clone(),
        }
    }
}

impl SftpSettings {
    pub fn ssh_config(&self) -> SshConfig {
        let mut config = SshConfig::new(&self.host, &self.username, copy_secret(&self.password));
        config.port = self.port;
        config.timeout = self.timeout;
        config.host_key_verification = self.host_key_verification;
        config.known_hosts_path = self.known_hosts_path.clone();
        config.algorithms = self.algorithms.clone();
        config
    }
}

struct SftpConnection {
    transport: SshTransport,
    sftp: SftpSession,

    /// Directories known to exist on the server.
    dirs: HashSet<String>,
}

/// Uploads over SFTP, connecting on first use and after failures.
pub struct SftpTarget {
    settings: SftpSettings,
    connection: Option<SftpConnection>,
}

impl SftpTarget {
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings,
            connection: None,
        }
    }

    async fn connect(&self) -> Result<SftpConnection> {
        let transport = SshTransport::connect(self.settings.ssh_config()).await?;
        let channel = transport.open_subsystem("sftp").await?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| sftp_error(&self.settings.host, e))?;
        debug!("sftp session open to {}:{}", self.settings.host, self.settings.port);
        Ok(SftpConnection {
            transport,
            sftp,
            dirs: HashSet::new(),
        })
    }

    async fn connection(&mut self) -> Result<&mut SftpConnection> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.connect().await?,
        };
        Ok(self.connection.insert(connection))
    }
}

impl SftpConnection {
    /// Create `dir` and any missing parents.
    async fn ensure_dir(&mut self, dir: &str) -> Result<()> {
        let mut current = String::new();
        for part in dir.split('/') {
            if part.is_empty() {
                if current.is_empty() && dir.starts_with('/') {
                    current.push('/');
                }
                continue;
            }
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(part);

            if self.dirs.contains(&current) {
                continue;
            }
            let exists = self
                .sftp
                .try_exists(current.clone())
                .await
                .map_err(|e| sftp_error(&current, e))?;
            if !exists {
                self.sftp
                    .create_dir(current.clone())
                    .await
                    .map_err(|e| sftp_error(&current, e))?;
            }
            self.dirs.insert(current.clone());
        }
        Ok(())
    }
}

impl UploadTarget for SftpTarget {
    async fn put(&mut self, path: &str, blob: &[u8]) -> Result<()> {
        let connection = self.connection().await?;
        if let Some((dir, _)) = path.rsplit_once('/') {
            if !dir.is_empty() {
                connection.ensure_dir(dir).await?;
            }
        }

        // Written aside and renamed, so a listed remote file is complete
        let partial = format!("{}.tmp", path);
        let mut file = connection
            .sftp
            .create(partial.clone())
            .await
            .map_err(|e| sftp_error(path, e))?;
        file.write_all(blob).await.map_err(|e| sftp_error(path, e))?;
        file.shutdown().await.map_err(|e| sftp_error(path, e))?;
        connection
            .sftp
            .rename(partial, path.to_string())
            .await
            .map_err(|e| sftp_error(path, e))?;

        debug!("uploaded {} ({} bytes)", path, blob.len());
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<()> {
        let connection = self.connection().await?;
        let exists = connection
            .sftp
            .try_exists(path.to_string())
            .await
            .map_err(|e| sftp_error(path, e))?;
        if exists {
            connection
                .sftp
                .remove_file(path.to_string())
                .await
                .map_err(|e| sftp_error(path, e))?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        if let Some(connection) = self.connection.take() {
            // Dropping the handle tears the connection down
            drop(connection.sftp);
            drop(connection.transport);
        }
    }
}

fn sftp_error(path: &str, e: impl std::fmt::Display) -> crate::Error {
    ArchiveError::Upload {
        path: path.to_string(),
        message: e.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::archive::{Archive, MemoryStore};
    use crate::events::RecordingSink;

    /// Keeps uploads in memory; fails the first `flaky` operations.
    #[derive(Clone, Default)]
    struct MemoryTarget {
        files: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        flaky: Arc<Mutex<usize>>,
        resets: Arc<Mutex<usize>>,
        refuse: bool,
    }

    impl MemoryTarget {
        fn paths(&self) -> Vec<String> {
            self.files.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }

        fn fail_now(&self) -> bool {
            let mut flaky = self.flaky.lock().unwrap();
            if *flaky > 0 {
                *flaky -= 1;
                return true;
            }
            self.refuse
        }
    }

    impl UploadTarget for MemoryTarget {
        async fn put(&mut self, path: &str, blob: &[u8]) -> Result<()> {
            if self.fail_now() {
                return Err(sftp_error(path, "connection reset"));
            }
            self.files.lock().unwrap().push((path.to_string(), blob.to_vec()));
            Ok(())
        }

        async fn remove(&mut self, path: &str) -> Result<()> {
            if self.fail_now() {
                return Err(sftp_error(path, "connection reset"));
            }
            self.files.lock().unwrap().retain(|(p, _)| p != path);
            Ok(())
        }

        fn reset(&mut self) {
            *self.resets.lock().unwrap() += 1;
        }
    }

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, min, 0).unwrap()
    }

    #[test]
    fn test_remote_path_mirrors_local_layout() {
        let key = EntryKey::new("EOR1", at(0));
        assert_eq!(
            remote_path("/home/gns3/remote_backups/", &key),
            "/home/gns3/remote_backups/EOR1/running-config_20261014T120000.000Z.txt"
        );
    }

    #[tokio::test]
    async fn test_recorded_snapshots_are_uploaded() {
        let (queue, receiver) = upload_queue();
        let target = MemoryTarget::default();
        let sink = Arc::new(RecordingSink::new());
        let uploader = Uploader::new(target.clone(), "/backups").with_events(sink.clone());
        let task = tokio::spawn(uploader.run(receiver));

        let archive = Archive::new(MirrorStore::new(MemoryStore::new(), queue.clone()));
        let first = archive.record("PE", b"hostname PE\n", at(0)).unwrap();
        archive.record("PE", b"hostname PE\n", at(1)).unwrap();
        assert!(queue.flush().await);

        assert_eq!(
            target.paths(),
            vec![
                "/backups/PE/running-config_20261014T120000.000Z.txt".to_string(),
                "/backups/PE/running-config_20261014T120100.000Z.txt".to_string(),
            ]
        );
        assert!(sink.events().iter().any(|e| matches!(
            e,
            CycleEvent::SnapshotUploaded { entry, .. } if *entry == first.entry.key
        )));

        // Retention removals follow the local store
        archive.store().remove(&first.entry.key).unwrap();
        assert!(queue.flush().await);
        assert_eq!(target.paths().len(), 1);

        drop(archive);
        drop(queue);
        let stats = task.await.unwrap();
        assert_eq!(stats, UploadStats { uploaded: 2, removed: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_failed_upload_gets_one_fresh_attempt() {
        let (queue, receiver) = upload_queue();
        let target = MemoryTarget {
            flaky: Arc::new(Mutex::new(1)),
            ..Default::default()
        };
        let task = tokio::spawn(Uploader::new(target.clone(), "/b").run(receiver));

        let store = MirrorStore::new(MemoryStore::new(), queue.clone());
        store.put(&EntryKey::new("PE", at(0)), b"x").unwrap();
        assert!(queue.flush().await);

        assert_eq!(target.paths().len(), 1);
        assert_eq!(*target.resets.lock().unwrap(), 1);
        drop(store);
        drop(queue);
        assert_eq!(task.await.unwrap().uploaded, 1);
    }

    #[tokio::test]
    async fn test_unreachable_target_never_fails_the_local_write() {
        let (queue, receiver) = upload_queue();
        let target = MemoryTarget {
            refuse: true,
            ..Default::default()
        };
        let sink = Arc::new(RecordingSink::new());
        let task = tokio::spawn(
            Uploader::new(target.clone(), "/b")
                .with_events(sink.clone())
                .run(receiver),
        );

        let archive = Archive::new(MirrorStore::new(MemoryStore::new(), queue.clone()));
        let recorded = archive.record("SPINE", b"hostname SPINE\n", at(0)).unwrap();
        assert_eq!(archive.entries("SPINE").unwrap(), vec![recorded.entry.key.clone()]);
        assert!(queue.flush().await);

        assert!(target.paths().is_empty());
        assert!(sink.events().iter().any(|e| matches!(
            e,
            CycleEvent::UploadFailed { message, .. } if message.contains("connection reset")
        )));

        drop(archive);
        drop(queue);
        assert_eq!(task.await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_stopped_uploader_does_not_break_the_store() {
        let (queue, receiver) = upload_queue();
        drop(receiver);

        let store = MirrorStore::new(MemoryStore::new(), queue.clone());
        store.put(&EntryKey::new("PE", at(0)), b"x").unwrap();
        assert_eq!(store.local().list("PE").unwrap().len(), 1);
        assert!(!queue.flush().await);
    }

    #[test]
    fn test_settings_build_ssh_config() {
        let settings = SftpSettings {
            host: "192.168.37.128".to_string(),
            port: 22,
            username: "gns3".to_string(),
            password: SecretString::from("gns3"),
            remote_dir: "/home/gns3/remote_backups".to_string(),
            timeout: Duration::from_secs(10),
            host_key_verification: HostKeyVerification::Strict,
            known_hosts_path: None,
            algorithms: AlgorithmProfile::default(),
        };
        let config = settings.clone().ssh_config();
        assert_eq!(config.socket_addr(), "192.168.37.128:22");
        assert_eq!(config.username, "gns3");
        assert_eq!(config.host_key_verification, HostKeyVerification::Strict);
    }
}
