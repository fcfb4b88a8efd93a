pub const ESC_KEY: i32 = 27;

/// ESC, `q` or `Q`; ends the undistorted replay of an image list.
pub fn is_stop_key(key: i32) -> bool {
    if key < 0 {
        return false;
    }
    let k = key & 0xff;
    k == ESC_KEY || k == b'q' as i32 || k == b'Q' as i32
}

/// Commands of the calibration tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationCommand {
    CaptureSample,
    SaveScreenshot,
    SavePoints,
    ClearMask,
    PopPoint,
    ToggleUndistort,
    StartCapturing,
    Quit,
}

impl CalibrationCommand {
    /// Map a `wait_key` result. Only the low byte is significant.
    pub fn from_key(key: i32) -> Option<Self> {
        if key < 0 {
            return None;
        }
        match key & 0xff {
            ESC_KEY => Some(Self::Quit),
            k => match k as u8 {
                b' ' => Some(Self::CaptureSample),
                b's' => Some(Self::SaveScreenshot),
                b'p' => Some(Self::SavePoints),
                b'c' => Some(Self::ClearMask),
                b'k' => Some(Self::PopPoint),
                b'u' => Some(Self::ToggleUndistort),
                b'g' => Some(Self::StartCapturing),
                _ => None,
            },
        }
    }
}

/// Commands of the point tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerCommand {
    Reinitialize,
    ClearPoints,
    ToggleNightMode,
    Quit,
}

impl TrackerCommand {
    pub fn from_key(key: i32) -> Option<Self> {
        if key < 0 {
            return None;
        }
        match key & 0xff {
            ESC_KEY => Some(Self::Quit),
            k => match k as u8 {
                b'r' => Some(Self::Reinitialize),
                b'c' => Some(Self::ClearPoints),
                b'n' => Some(Self::ToggleNightMode),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn replay_stop_keys() {
        assert!(is_stop_key(ESC_KEY));
        assert!(is_stop_key('q' as i32));
        assert!(is_stop_key('Q' as i32));
        assert!(is_stop_key(0x100 | 'q' as i32));
        assert!(!is_stop_key(-1));
        assert!(!is_stop_key(' ' as i32));
    }

    #[test]
    fn calibration_keys() {
        assert_eq!(CalibrationCommand::from_key(-1), None);
        assert_eq!(CalibrationCommand::from_key(27), Some(CalibrationCommand::Quit));
        assert_eq!(
            CalibrationCommand::from_key(b' ' as i32),
            Some(CalibrationCommand::CaptureSample)
        );
        assert_eq!(
            CalibrationCommand::from_key(0x100000 | b'k' as i32),
            Some(CalibrationCommand::PopPoint)
        );
        assert_eq!(CalibrationCommand::from_key(b'x' as i32), None);
    }

    #[test]
    fn tracker_keys() {
        assert_eq!(TrackerCommand::from_key(b'r' as i32), Some(TrackerCommand::Reinitialize));
        assert_eq!(TrackerCommand::from_key(b'n' as i32), Some(TrackerCommand::ToggleNightMode));
        assert_eq!(TrackerCommand::from_key(27), Some(TrackerCommand::Quit));
        assert_eq!(TrackerCommand::from_key(b'u' as i32), None);
    }
}
