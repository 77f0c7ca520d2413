//! Input recording, playback, and replay persistence.
//!
//! A replay is nothing but the resolved input of every player slot, one
//! [`Buttons`] snapshot per simulated frame. Because every non-input state
//! transition of the pipeline is a pure function of the current state and the
//! per-frame input, feeding the same queues to an identical stage build
//! reproduces the original session exactly.
//!
//! # Recording and playback
//!
//! ```
//! use tilerun_core::input::Buttons;
//! use tilerun_engine::replay::ReplayQueues;
//!
//! let jump = Buttons { special1: true, ..Buttons::NEUTRAL };
//! let mut recorded = ReplayQueues::new();
//! recorded.record(0, jump);
//! recorded.record(0, Buttons::NEUTRAL);
//!
//! let mut playback = ReplayQueues::from_slots(recorded.to_slots());
//! assert_eq!(playback.next(0), jump);
//! assert_eq!(playback.next(0), Buttons::NEUTRAL);
//! assert!(playback.playback_ended());
//! // Exhausted queues keep answering with neutral input.
//! assert_eq!(playback.next(0), Buttons::NEUTRAL);
//! ```
//!
//! # Determinism checkpoints
//!
//! While recording, the session stores the [`FrameSnapshot`] hash every
//! `checkpoint_interval` input frames. During playback the same frames are
//! hashed again; the first mismatch is reported as a [`ReplayDivergence`].
//!
//! [`FrameSnapshot`]: crate::snapshot::FrameSnapshot

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tilerun_core::input::Buttons;
use tracing::{info, warn};

use crate::SessionError;

// ---------------------------------------------------------------------------
// ReplayQueues
// ---------------------------------------------------------------------------

/// One FIFO of button snapshots per player slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayQueues {
    slots: Vec<VecDeque<Buttons>>,
}

impl ReplayQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: Vec<Vec<Buttons>>) -> Self {
        Self {
            slots: slots.into_iter().map(VecDeque::from).collect(),
        }
    }

    /// Append the resolved input of `slot` for this frame.
    pub fn record(&mut self, slot: usize, buttons: Buttons) {
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, VecDeque::new);
        }
        self.slots[slot].push_back(buttons);
    }

    /// Pop the next snapshot of `slot`. An exhausted or missing queue yields
    /// the neutral frame.
    pub fn next(&mut self, slot: usize) -> Buttons {
        self.slots
            .get_mut(slot)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Buttons::NEUTRAL)
    }

    /// Whether any slot has run out of snapshots.
    pub fn playback_ended(&self) -> bool {
        self.slots.iter().any(VecDeque::is_empty)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Snapshots left in `slot`.
    pub fn len(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(VecDeque::is_empty)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Copy of the queued snapshots, slot by slot.
    pub fn to_slots(&self) -> Vec<Vec<Buttons>> {
        self.slots.iter().map(|q| q.iter().copied().collect()).collect()
    }
}

// ---------------------------------------------------------------------------
// Checkpoints and divergence
// ---------------------------------------------------------------------------

/// A state hash recorded after input frame `frame`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCheckpoint {
    pub frame: u64,
    pub state_hash: String,
}

/// Details about a determinism failure detected during playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDivergence {
    pub frame: u64,
    pub expected_hash: String,
    pub actual_hash: String,
}

/// Compares playback state hashes against the recorded checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CheckpointVerifier {
    expected: BTreeMap<u64, String>,
    first_divergence: Option<ReplayDivergence>,
}

impl CheckpointVerifier {
    pub fn new(checkpoints: &[ReplayCheckpoint]) -> Self {
        Self {
            expected: checkpoints
                .iter()
                .map(|c| (c.frame, c.state_hash.clone()))
                .collect(),
            first_divergence: None,
        }
    }

    pub fn has_checkpoint(&self, frame: u64) -> bool {
        self.expected.contains_key(&frame)
    }

    /// Check the hash computed at `frame`. Returns the divergence if this is
    /// the first mismatch.
    pub fn verify(&mut self, frame: u64, actual_hash: &str) -> Option<ReplayDivergence> {
        let expected = self.expected.get(&frame)?;
        if expected == actual_hash || self.first_divergence.is_some() {
            return None;
        }
        let divergence = ReplayDivergence {
            frame,
            expected_hash: expected.clone(),
            actual_hash: actual_hash.to_owned(),
        };
        warn!(
            frame,
            expected = %divergence.expected_hash,
            actual = %divergence.actual_hash,
            "replay diverged from recording"
        );
        self.first_divergence = Some(divergence.clone());
        Some(divergence)
    }

    pub fn first_divergence(&self) -> Option<&ReplayDivergence> {
        self.first_divergence.as_ref()
    }
}

// ---------------------------------------------------------------------------
// ReplayArtifact
// ---------------------------------------------------------------------------

/// How the recorded session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayOutcome {
    Death,
    Victorious,
}

impl ReplayOutcome {
    pub fn label(self) -> &'static str {
        match self {
            ReplayOutcome::Death => "Death",
            ReplayOutcome::Victorious => "Victorious",
        }
    }
}

/// A persisted replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayArtifact {
    /// Name of the stage the replay was recorded on.
    pub stage: String,
    /// Per-slot input snapshots.
    pub slots: Vec<Vec<Buttons>>,
    pub elapsed_ms: u64,
    pub difficulty: String,
    pub outcome: ReplayOutcome,
    /// Name entered by the player, or an automatic label.
    pub player: String,
    /// Free-form stage metadata, handed back to the stage before playback.
    pub meta: String,
    /// Creation time in seconds since the Unix epoch.
    pub created: u64,
    /// BLAKE3 digest of the input payload.
    pub digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkpoints: Vec<ReplayCheckpoint>,
}

/// Everything needed to assemble an artifact except the input payload.
#[derive(Debug, Clone)]
pub struct ReplayHeader {
    pub stage: String,
    pub elapsed_ms: u64,
    pub difficulty: String,
    pub outcome: ReplayOutcome,
    pub player: String,
    pub meta: String,
}

impl ReplayArtifact {
    /// Build an artifact stamped with the current time.
    pub fn new(
        header: ReplayHeader,
        slots: Vec<Vec<Buttons>>,
        checkpoints: Vec<ReplayCheckpoint>,
    ) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let digest = input_digest(&slots);
        Self {
            stage: header.stage,
            slots,
            elapsed_ms: header.elapsed_ms,
            difficulty: header.difficulty,
            outcome: header.outcome,
            player: header.player,
            meta: header.meta,
            created,
            digest,
            checkpoints,
        }
    }

    /// Whether the stored digest matches the input payload.
    pub fn verify_digest(&self) -> bool {
        input_digest(&self.slots) == self.digest
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode an artifact and check its digest.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let artifact: Self = serde_json::from_str(json)?;
        let actual = input_digest(&artifact.slots);
        if actual != artifact.digest {
            return Err(SessionError::ReplayDigest {
                expected: artifact.digest,
                actual,
            });
        }
        Ok(artifact)
    }

    /// File name for this replay: `<stage>_<player>_<outcome>_<created>.json`,
    /// with every character outside `[A-Za-z0-9-]` replaced by `-`.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.file_stem())
    }

    /// File name for the `n`th replay saved under the same name in the same
    /// second: `<stem>#<n>.json`.
    pub fn numbered_file_name(&self, n: u32) -> String {
        format!("{}#{n}.json", self.file_stem())
    }

    fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            sanitize(&self.stage),
            sanitize(&self.player),
            self.outcome.label(),
            self.created
        )
    }

    /// Queues ready for playback.
    pub fn queues(&self) -> ReplayQueues {
        ReplayQueues::from_slots(self.slots.clone())
    }
}

fn sanitize(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_owned()
    } else {
        cleaned
    }
}

/// Pack a snapshot into a bitmask, one bit per button in declaration order.
fn pack(b: &Buttons) -> u16 {
    [
        b.up,
        b.down,
        b.left,
        b.right,
        b.special1,
        b.special2,
        b.special3,
        b.switch_char,
        b.suicide,
    ]
    .iter()
    .enumerate()
    .fold(0, |acc, (i, &on)| acc | (u16::from(on) << i))
}

/// BLAKE3 hex digest of per-slot input.
pub fn input_digest(slots: &[Vec<Buttons>]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(slots.len() as u64).to_le_bytes());
    for slot in slots {
        hasher.update(&(slot.len() as u64).to_le_bytes());
        for b in slot {
            hasher.update(&pack(b).to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

// ---------------------------------------------------------------------------
// ReplayStore
// ---------------------------------------------------------------------------

/// Where finished replays are persisted.
pub trait ReplayStore {
    /// Persist an artifact, returning the key it can be loaded by.
    fn save(&mut self, artifact: &ReplayArtifact) -> Result<String, SessionError>;

    fn load(&self, key: &str) -> Result<ReplayArtifact, SessionError>;

    /// Keys of every stored replay, sorted.
    fn list(&self) -> Result<Vec<String>, SessionError>;
}

/// Stores each replay as a JSON file in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryReplayStore {
    dir: PathBuf,
}

impl DirectoryReplayStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SessionError + '_ {
        move |source| SessionError::ReplayIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl ReplayStore for DirectoryReplayStore {
    fn save(&mut self, artifact: &ReplayArtifact) -> Result<String, SessionError> {
        fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;
        let json = artifact.to_json()?;
        let mut name = artifact.file_name();
        let mut n = 1;
        let path = loop {
            let path = self.dir.join(&name);
            // `create_new` fails instead of overwriting a same-second save.
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes()).map_err(Self::io_err(&path))?;
                    break path;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    name = artifact.numbered_file_name(n);
                    n += 1;
                }
                Err(e) => return Err(Self::io_err(&path)(e)),
            }
        };
        info!(path = %path.display(), outcome = artifact.outcome.label(), "replay saved");
        Ok(name)
    }

    fn load(&self, key: &str) -> Result<ReplayArtifact, SessionError> {
        let path = self.dir.join(key);
        if !path.is_file() {
            return Err(SessionError::ReplayNotFound(key.to_owned()));
        }
        let json = fs::read_to_string(&path).map_err(Self::io_err(&path))?;
        ReplayArtifact::from_json(&json)
    }

    fn list(&self) -> Result<Vec<String>, SessionError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(Self::io_err(&self.dir))? {
            let entry = entry.map_err(Self::io_err(&self.dir))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    keys.push(name.to_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store. Clones share the same storage, so a test can keep one
/// handle while the session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryReplayStore {
    artifacts: Rc<RefCell<BTreeMap<String, ReplayArtifact>>>,
}

impl MemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.borrow().is_empty()
    }

    /// Every stored artifact, ordered by key.
    pub fn artifacts(&self) -> Vec<ReplayArtifact> {
        self.artifacts.borrow().values().cloned().collect()
    }
}

impl ReplayStore for MemoryReplayStore {
    fn save(&mut self, artifact: &ReplayArtifact) -> Result<String, SessionError> {
        let mut artifacts = self.artifacts.borrow_mut();
        // Same-second saves share a file name; suffix to keep both.
        let mut key = artifact.file_name();
        let mut n = 1;
        while artifacts.contains_key(&key) {
            key = artifact.numbered_file_name(n);
            n += 1;
        }
        artifacts.insert(key.clone(), artifact.clone());
        Ok(key)
    }

    fn load(&self, key: &str) -> Result<ReplayArtifact, SessionError> {
        self.artifacts
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| SessionError::ReplayNotFound(key.to_owned()))
    }

    fn list(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.artifacts.borrow().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(outcome: ReplayOutcome) -> ReplayHeader {
        ReplayHeader {
            stage: "Cave of Doom!".to_owned(),
            elapsed_ms: 1234,
            difficulty: "Hard".to_owned(),
            outcome,
            player: "Player One".to_owned(),
            meta: "door=open".to_owned(),
        }
    }

    fn left() -> Buttons {
        Buttons {
            left: true,
            ..Buttons::NEUTRAL
        }
    }

    #[test]
    fn exhausted_queue_yields_neutral_and_ends_playback() {
        let mut q = ReplayQueues::from_slots(vec![vec![left(); 3]]);
        for _ in 0..3 {
            assert!(!q.playback_ended());
            assert_eq!(q.next(0), left());
        }
        assert!(q.playback_ended());
        assert_eq!(q.next(0), Buttons::NEUTRAL);
        assert_eq!(q.next(5), Buttons::NEUTRAL, "missing slot is neutral");
    }

    #[test]
    fn record_grows_slots() {
        let mut q = ReplayQueues::new();
        q.record(2, left());
        assert_eq!(q.slot_count(), 3);
        assert_eq!(q.len(2), 1);
        assert_eq!(q.to_slots()[0], Vec::<Buttons>::new());
    }

    #[test]
    fn artifact_json_round_trip_checks_digest() {
        let artifact = ReplayArtifact::new(
            header(ReplayOutcome::Victorious),
            vec![vec![left(), Buttons::NEUTRAL]],
            vec![ReplayCheckpoint {
                frame: 60,
                state_hash: "ab".repeat(32),
            }],
        );
        assert!(artifact.verify_digest());
        let json = artifact.to_json().unwrap();
        assert_eq!(ReplayArtifact::from_json(&json).unwrap(), artifact);

        let mut tampered = artifact.clone();
        tampered.slots[0][1] = left();
        let err = ReplayArtifact::from_json(&tampered.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, SessionError::ReplayDigest { .. }));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = ReplayArtifact::from_json("{\"stage\": 3}").unwrap_err();
        assert!(matches!(err, SessionError::ReplayDecode(_)));
    }

    #[test]
    fn file_name_is_sanitised() {
        let mut artifact = ReplayArtifact::new(header(ReplayOutcome::Death), vec![], vec![]);
        artifact.created = 1_700_000_000;
        assert_eq!(
            artifact.file_name(),
            "Cave-of-Doom-_Player-One_Death_1700000000.json"
        );
    }

    #[test]
    fn digest_distinguishes_slot_layout() {
        let a = input_digest(&[vec![left()], vec![]]);
        let b = input_digest(&[vec![], vec![left()]]);
        assert_ne!(a, b);
    }

    #[test]
    fn verifier_reports_first_divergence_once() {
        let mut v = CheckpointVerifier::new(&[
            ReplayCheckpoint {
                frame: 10,
                state_hash: "aaa".to_owned(),
            },
            ReplayCheckpoint {
                frame: 20,
                state_hash: "bbb".to_owned(),
            },
        ]);
        assert!(v.verify(5, "zzz").is_none(), "no checkpoint at 5");
        assert!(v.verify(10, "aaa").is_none());
        let d = v.verify(20, "ccc").unwrap();
        assert_eq!(d.frame, 20);
        assert!(v.verify(20, "ddd").is_none());
        assert_eq!(v.first_divergence(), Some(&d));
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryReplayStore::new();
        let shared = store.clone();
        let artifact = ReplayArtifact::new(header(ReplayOutcome::Death), vec![vec![left()]], vec![]);
        let k1 = store.save(&artifact).unwrap();
        let k2 = store.save(&artifact).unwrap();
        assert_ne!(k1, k2);
        assert_eq!(shared.len(), 2);
        assert_eq!(shared.load(&k1).unwrap(), artifact);
        assert!(matches!(
            store.load("missing"),
            Err(SessionError::ReplayNotFound(_))
        ));
    }

    #[test]
    fn directory_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("tilerun-replays-{}", std::process::id()));
        let mut store = DirectoryReplayStore::new(&dir);
        let artifact = ReplayArtifact::new(header(ReplayOutcome::Victorious), vec![vec![left()]], vec![]);
        let key = store.save(&artifact).unwrap();
        assert_eq!(store.list().unwrap(), vec![key.clone()]);
        assert_eq!(store.load(&key).unwrap(), artifact);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn directory_store_keeps_same_second_saves() {
        let dir = std::env::temp_dir().join(format!("tilerun-collide-{}", std::process::id()));
        let mut store = DirectoryReplayStore::new(&dir);
        let first = ReplayArtifact::new(header(ReplayOutcome::Victorious), vec![vec![left()]], vec![]);
        let mut second = first.clone();
        second.slots = vec![vec![left(), left()]];
        second.digest = input_digest(&second.slots);

        let k1 = store.save(&first).unwrap();
        let k2 = store.save(&second).unwrap();
        let k3 = store.save(&first).unwrap();
        assert_eq!(k1, first.file_name());
        assert_eq!(k2, first.numbered_file_name(1));
        assert_eq!(k3, first.numbered_file_name(2));
        assert_eq!(store.list().unwrap().len(), 3);
        assert_eq!(store.load(&k1).unwrap(), first);
        assert_eq!(store.load(&k2).unwrap(), second);
        fs::remove_dir_all(&dir).unwrap();
    }
}
