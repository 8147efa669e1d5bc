//! Media-plane collaborators the signaling core only depends on through a
//! trait: one channel per dialog leg, and a mixer a Meeting joins legs
//! into. The actual RTP/SDP path lives outside this crate; what's here is
//! the seam plus an in-memory double good enough for tests and for
//! running the engine with signaling-only scenarios.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One leg's media capability set: playing announcements, call-progress
/// tones, and the lifecycle around a join into a mixer.
pub trait MediaChannel: Send + Sync {
    fn play(&self, files: &[String]);
    fn beeps(&self);
    fn stop(&self);
    fn start(&self);
    fn end(&self);
}

/// Joins channels together so their audio is bridged.
pub trait Mixer: Send + Sync {
    fn join(&self, channel: std::sync::Arc<dyn MediaChannel>);
}

/// Records the last action taken, for assertions in tests and for
/// scenarios that run with no real media backend attached.
#[derive(Debug, Default)]
pub struct InMemoryMediaChannel {
    started: AtomicBool,
    ended: AtomicBool,
    last_played: Mutex<Vec<String>>,
    beeped: AtomicBool,
}

impl InMemoryMediaChannel {
    pub fn new() -> Self {
        InMemoryMediaChannel::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn last_played(&self) -> Vec<String> {
        self.last_played.lock().unwrap().clone()
    }

    pub fn did_beep(&self) -> bool {
        self.beeped.load(Ordering::SeqCst)
    }
}

impl MediaChannel for InMemoryMediaChannel {
    fn play(&self, files: &[String]) {
        *self.last_played.lock().unwrap() = files.to_vec();
    }

    fn beeps(&self) {
        self.beeped.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.last_played.lock().unwrap().clear();
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

/// A mixer that just records which channels were joined, for scenarios
/// and tests that don't need real audio bridging.
#[derive(Default)]
pub struct InMemoryMixer {
    joined: Mutex<Vec<std::sync::Arc<dyn MediaChannel>>>,
}

impl InMemoryMixer {
    pub fn new() -> Self {
        InMemoryMixer::default()
    }

    pub fn joined_count(&self) -> usize {
        self.joined.lock().unwrap().len()
    }
}

impl Mixer for InMemoryMixer {
    fn join(&self, channel: std::sync::Arc<dyn MediaChannel>) {
        channel.start();
        self.joined.lock().unwrap().push(channel);
    }
}
