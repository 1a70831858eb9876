use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Current UTC time truncated to whole microseconds, the precision rows are stored with.
pub(crate) fn now_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.microsecond() * 1_000).unwrap_or(now)
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, PrimitiveDateTime, Time, UtcOffset};

    #[test]
    fn format_offset_outputs_utc_z() {
        let date = Date::from_calendar_date(2025, time::Month::March, 4).unwrap();
        let time = Time::from_hms(9, 15, 0).unwrap();
        let value = PrimitiveDateTime::new(date, time).assume_utc();
        assert_eq!(format_offset(value), "2025-03-04T09:15:00Z");
    }

    #[test]
    fn format_offset_preserves_offset() {
        let date = Date::from_calendar_date(2025, time::Month::March, 4).unwrap();
        let time = Time::from_hms(9, 15, 0).unwrap();
        let utc = PrimitiveDateTime::new(date, time).assume_utc();
        let shifted = utc.to_offset(UtcOffset::from_hms(3, 0, 0).unwrap());
        assert_eq!(format_offset(shifted), "2025-03-04T12:15:00+03:00");
    }

    #[test]
    fn now_utc_drops_sub_microsecond_precision() {
        assert_eq!(now_utc().nanosecond() % 1_000, 0);
    }
}
