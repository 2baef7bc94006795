use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Asia/Ho_Chi_Minh has been UTC+07:00 without daylight saving since 1975.
const VIETNAM_UTC_OFFSET_SECS: i32 = 7 * 3600;

pub fn vietnam_offset() -> FixedOffset {
    FixedOffset::east_opt(VIETNAM_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Current wall-clock time in the regional timezone.
pub fn now_in_vietnam() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&vietnam_offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vietnam_offset() {
        let now = now_in_vietnam();
        assert_eq!(now.offset().local_minus_utc(), 7 * 3600);
        assert!(now.to_rfc3339().ends_with("+07:00"));
    }
}
