//! Send windows: local hours during which outreach emails may go out.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::CampaignError;

/// Daily window, in local time, in which emails are delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendWindow {
    /// First hour of the window (0..=23).
    pub start_hour: u32,
    /// Hour the window closes, exclusive (1..=24).
    pub end_hour: u32,
    /// IANA timezone used when the recipient's cannot be inferred.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Infer the timezone from the lead's location when possible.
    #[serde(default)]
    pub use_recipient_timezone: bool,
    /// Skip Saturdays and Sundays.
    #[serde(default)]
    pub weekdays_only: bool,
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

impl SendWindow {
    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(CampaignError::InvalidConfig(format!(
                "send_window hours must satisfy start_hour < end_hour <= 24, got {}..{}",
                self.start_hour, self.end_hour
            )));
        }
        self.timezone.parse::<Tz>().map_err(|_| {
            CampaignError::InvalidConfig(format!(
                "send_window.timezone '{}' is not a known timezone",
                self.timezone
            ))
        })?;
        Ok(())
    }

    /// Timezone that applies to a recipient at `location`.
    pub fn timezone_for(&self, location: Option<&str>) -> Tz {
        if self.use_recipient_timezone {
            if let Some(tz) = location.and_then(infer_timezone) {
                return tz;
            }
        }
        self.timezone.parse().unwrap_or(chrono_tz::America::New_York)
    }

    /// Earliest instant at or after `at` that falls inside the window.
    pub fn next_slot(&self, at: DateTime<Utc>, location: Option<&str>) -> DateTime<Utc> {
        let tz = self.timezone_for(location);
        let local = at.with_timezone(&tz);
        if self.allows_day(local.date_naive())
            && local.hour() >= self.start_hour
            && local.hour() < self.end_hour
        {
            return at;
        }

        let mut date = local.date_naive();
        // A week always contains an allowed day
        for _ in 0..8 {
            if let Some(start) = self.opening(tz, date) {
                if start > at {
                    return start;
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        at
    }

    fn allows_day(&self, date: NaiveDate) -> bool {
        !(self.weekdays_only && matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
    }

    fn opening(&self, tz: Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
        if !self.allows_day(date) {
            return None;
        }
        let naive = date.and_hms_opt(self.start_hour, 0, 0)?;
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }
}

/// Best-effort timezone for a free-form location ("Austin, TX", "Mumbai, India").
pub fn infer_timezone(location: &str) -> Option<Tz> {
    use chrono_tz::{America, Asia, Australia, Europe};

    const PLACES: &[(&str, Tz)] = &[
        ("new york", America::New_York),
        ("nyc", America::New_York),
        ("boston", America::New_York),
        ("miami", America::New_York),
        ("chicago", America::Chicago),
        ("dallas", America::Chicago),
        ("houston", America::Chicago),
        ("austin", America::Chicago),
        ("texas", America::Chicago),
        ("denver", America::Denver),
        ("phoenix", America::Phoenix),
        ("los angeles", America::Los_Angeles),
        ("san francisco", America::Los_Angeles),
        ("seattle", America::Los_Angeles),
        ("california", America::Los_Angeles),
        ("toronto", America::Toronto),
        ("canada", America::Toronto),
        ("london", Europe::London),
        ("uk", Europe::London),
        ("paris", Europe::Paris),
        ("berlin", Europe::Berlin),
        ("germany", Europe::Berlin),
        ("amsterdam", Europe::Amsterdam),
        ("mumbai", Asia::Kolkata),
        ("bangalore", Asia::Kolkata),
        ("india", Asia::Kolkata),
        ("singapore", Asia::Singapore),
        ("tokyo", Asia::Tokyo),
        ("japan", Asia::Tokyo),
        ("dubai", Asia::Dubai),
        ("uae", Asia::Dubai),
        ("sydney", Australia::Sydney),
        ("australia", Australia::Sydney),
    ];

    // Whole words only, so "uk" does not match "milwaukee"
    let words: Vec<String> = location
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let padded = format!(" {} ", words.join(" "));

    PLACES
        .iter()
        .find(|(place, _)| padded.contains(&format!(" {} ", place)))
        .map(|(_, tz)| *tz)
}
