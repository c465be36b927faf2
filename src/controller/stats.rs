/// Counters over the lifetime of a controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    sessions_started: u64,
    data_messages: u64,
    ignored_messages: u64,
    audio_frames: u64,
}

impl SessionStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_started(&mut self) {
        self.sessions_started += 1;
    }

    pub(crate) fn data_message(&mut self, ignored: bool) {
        self.data_messages += 1;
        if ignored {
            self.ignored_messages += 1;
        }
    }

    pub(crate) fn audio_frame(&mut self) {
        self.audio_frames += 1;
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }

    pub fn data_messages(&self) -> u64 {
        self.data_messages
    }

    /// Data messages dropped as malformed or of an unknown kind.
    pub fn ignored_messages(&self) -> u64 {
        self.ignored_messages
    }

    pub fn audio_frames(&self) -> u64 {
        self.audio_frames
    }
}
