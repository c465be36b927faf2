pub const SESSION_TOKEN: &str = "VOICE_SESSION_TOKEN";
pub const SAMPLE_RATE: &str = "VOICE_SESSION_SAMPLE_RATE";
pub const INPUT_DEVICE: &str = "VOICE_SESSION_INPUT_DEVICE";
pub const OUTPUT_DEVICE: &str = "VOICE_SESSION_OUTPUT_DEVICE";
pub const RAW_AUDIO: &str = "VOICE_SESSION_RAW_AUDIO";
