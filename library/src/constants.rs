pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

pub const ALREADY_IN_CALL_NOTICE: &str =
    "You can't start a call because you already have one open!";
pub const DEVICE_NOT_FOUND_NOTICE: &str =
    "Unable to open your call because no camera and/or microphone were found.";
pub const CAPTURE_FAILED_NOTICE: &str = "Error opening your camera and/or microphone";
