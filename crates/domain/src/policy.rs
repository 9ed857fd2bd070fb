//! Pure queue policy: admission, priority, ordering and field validation.
//!
//! Nothing in this module touches the database. Callers gather the inputs
//! (configuration, schedule string, roster/teammate lookups, last-helped
//! time) and get decisions back.

use std::cmp::Ordering;

use chrono::{DateTime, Timelike, Utc};

use crate::entities::{QueueConfiguration, QueueEntry};

pub const MAX_LOCATION_LEN: usize = 300;
pub const MAX_DESCRIPTION_LEN: usize = 1500;

/// Half-hour slots per day; schedule strings carry one character per slot.
pub const SLOTS_PER_DAY: usize = 48;

/// Index of the half-hour slot containing the given local wall-clock time.
pub fn half_hour_index<T: Timelike>(local: &T) -> usize {
    ((local.hour() * 60 + local.minute()) / 30) as usize
}

/// Whether the queue currently admits signups.
///
/// Scheduled queues consult today's schedule string; `p` (priority-open)
/// admits exactly like `o`. Unscheduled queues follow the manual switch.
pub fn is_open(config: &QueueConfiguration, today: &str, half_hour: usize) -> bool {
    if !config.scheduled {
        return config.manual_open;
    }
    matches!(today.as_bytes().get(half_hour), Some(b'o') | Some(b'p'))
}

/// Store-derived facts consulted by the signup decision.
#[derive(Debug, Clone, Default)]
pub struct SignupContext {
    pub is_admin: bool,
    pub open: bool,
    /// Viewer is on the queue roster. Only consulted under
    /// `prevent_unregistered`.
    pub registered: bool,
    /// Some teammate of the viewer has an active entry. Only consulted under
    /// `prevent_groups`.
    pub teammate_active: bool,
    /// MAX(removed_at) over the viewer's helped entries removed by staff.
    pub last_helped: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupDenial {
    Closed,
    NotRegistered,
    TeammateActive,
    Cooldown { remaining_seconds: i64 },
}

impl SignupDenial {
    pub fn message(&self) -> String {
        match self {
            SignupDenial::Closed => "queue is closed".to_string(),
            SignupDenial::NotRegistered => "you are not on the roster for this queue".to_string(),
            SignupDenial::TeammateActive => {
                "a member of your group is already in the queue".to_string()
            }
            SignupDenial::Cooldown { remaining_seconds } => {
                format!("Try again in {}", cooldown_phrase(*remaining_seconds))
            }
        }
    }
}

/// Signup eligibility, checked in order with the first failure winning.
pub fn can_sign_up(
    config: &QueueConfiguration,
    ctx: &SignupContext,
    now: DateTime<Utc>,
) -> Result<(), SignupDenial> {
    if ctx.is_admin {
        return Ok(());
    }
    if !ctx.open {
        return Err(SignupDenial::Closed);
    }
    if config.prevent_unregistered && !ctx.registered {
        return Err(SignupDenial::NotRegistered);
    }
    if config.prevent_groups && ctx.teammate_active {
        return Err(SignupDenial::TeammateActive);
    }
    if config.cooldown_seconds > 0
        && let Some(last) = ctx.last_helped
    {
        let elapsed = (now - last).num_seconds();
        let remaining = config.cooldown_seconds as i64 - elapsed;
        if remaining > 0 {
            return Err(SignupDenial::Cooldown {
                remaining_seconds: remaining,
            });
        }
    }
    Ok(())
}

/// Human phrasing for a cooldown remainder: `"N seconds"`, `"a minute"`, or
/// `"N minutes"` (rounded up).
pub fn cooldown_phrase(remaining_seconds: i64) -> String {
    if remaining_seconds < 60 {
        return format!("{remaining_seconds} seconds");
    }
    let minutes = (remaining_seconds + 59) / 60;
    if minutes == 1 {
        "a minute".to_string()
    } else {
        format!("{minutes} minutes")
    }
}

/// Priority assigned to a newly inserted entry.
///
/// The daily-first-question boost goes to students who have not been helped
/// yet today; with `prevent_groups_boost` a teammate's helped entry also
/// consumes the boost.
pub fn new_entry_priority(
    config: &QueueConfiguration,
    helped_today: bool,
    teammate_helped_today: bool,
) -> i32 {
    if !config.prioritize_new {
        return 0;
    }
    if helped_today {
        return 0;
    }
    if config.prevent_groups_boost && teammate_helped_today {
        return 0;
    }
    1
}

/// Display order: pinned, then being-helped, then priority descending, then
/// insertion order via the id's embedded time. Total and stable.
pub fn display_cmp(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| b.is_helping().cmp(&a.is_helping()))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_for_display(entries: &mut [QueueEntry]) {
    entries.sort_by(display_cmp);
}

/// Validate a signup/update description against the queue's prompts.
///
/// With no prompts the description is free text and must not be mistakable
/// for the prompted shape, so JSON arrays and objects are refused. With
/// prompts it must be a JSON array of exactly one non-blank answer per
/// prompt.
pub fn validate_description(prompts: &[String], description: &str) -> Result<(), String> {
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        ));
    }
    if prompts.is_empty() {
        if description.trim().is_empty() {
            return Err("description must not be empty".to_string());
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(description)
            && (value.is_array() || value.is_object())
        {
            return Err("description must be plain text".to_string());
        }
        return Ok(());
    }
    let answers: Vec<String> = serde_json::from_str(description)
        .map_err(|_| "description must be a list of answers".to_string())?;
    if answers.len() != prompts.len() {
        return Err(format!(
            "expected {} answers, got {}",
            prompts.len(),
            answers.len()
        ));
    }
    for (i, answer) in answers.iter().enumerate() {
        if answer.trim().is_empty() {
            return Err(format!("answer {} must not be empty", i + 1));
        }
    }
    Ok(())
}

pub fn validate_location(location: &str) -> Result<(), String> {
    if location.len() > MAX_LOCATION_LEN {
        return Err(format!(
            "location must be at most {MAX_LOCATION_LEN} characters"
        ));
    }
    Ok(())
}

/// Validate a full-week schedule: 7 strings of 48 half-hour slots over
/// `{o, c, p}`.
pub fn validate_week_schedule(days: &[String]) -> Result<(), String> {
    if days.len() != 7 {
        return Err(format!("expected 7 day schedules, got {}", days.len()));
    }
    for (i, day) in days.iter().enumerate() {
        if day.len() != SLOTS_PER_DAY {
            return Err(format!(
                "day {} schedule must be {SLOTS_PER_DAY} characters, got {}",
                i,
                day.len()
            ));
        }
        if let Some(bad) = day.chars().find(|c| !matches!(c, 'o' | 'c' | 'p')) {
            return Err(format!("day {i} schedule has invalid character {bad:?}"));
        }
    }
    Ok(())
}

/// Validate a configured prompt list: no blank prompts, no duplicates.
pub fn validate_prompts(prompts: &[String]) -> Result<(), String> {
    for prompt in prompts {
        if prompt.trim().is_empty() {
            return Err("prompts must not be blank".to_string());
        }
    }
    for (i, prompt) in prompts.iter().enumerate() {
        if prompts[..i].contains(prompt) {
            return Err(format!("duplicate prompt {prompt:?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Tid;
    use chrono::{TimeZone, Utc};

    fn config() -> QueueConfiguration {
        QueueConfiguration {
            id: Tid::new(),
            is_virtual: false,
            enable_location_field: true,
            prevent_unregistered: false,
            prevent_groups: false,
            prevent_groups_boost: false,
            prioritize_new: false,
            scheduled: false,
            manual_open: false,
            cooldown_seconds: 0,
            prompts: vec![],
        }
    }

    fn entry(pinned: bool, helping: &str, priority: i32, id: Tid) -> QueueEntry {
        QueueEntry {
            id,
            queue: Tid::new(),
            email: "s@x.edu".into(),
            name: String::new(),
            description: String::new(),
            location: String::new(),
            priority,
            pinned,
            helping: helping.into(),
            helped: false,
            active: Some(true),
            removed_at: None,
            removed_by: None,
        }
    }

    #[test]
    fn half_hour_index_covers_the_day() {
        let morning = chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert_eq!(half_hour_index(&morning), 0);
        let noon_ish = chrono::NaiveTime::from_hms_opt(12, 29, 59).unwrap();
        assert_eq!(half_hour_index(&noon_ish), 24);
        let night = chrono::NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        assert_eq!(half_hour_index(&night), 47);
    }

    #[test]
    fn manual_queue_follows_the_switch() {
        let mut cfg = config();
        assert!(!is_open(&cfg, "", 10));
        cfg.manual_open = true;
        assert!(is_open(&cfg, "", 10));
    }

    #[test]
    fn scheduled_queue_reads_the_slot() {
        let mut cfg = config();
        cfg.scheduled = true;
        cfg.manual_open = true; // ignored when scheduled
        let mut day = "c".repeat(48);
        assert!(!is_open(&cfg, &day, 20));
        day.replace_range(20..21, "o");
        assert!(is_open(&cfg, &day, 20));
        day.replace_range(20..21, "p");
        assert!(is_open(&cfg, &day, 20), "priority-open admits like open");
    }

    #[test]
    fn admins_bypass_every_check() {
        let cfg = config();
        let ctx = SignupContext {
            is_admin: true,
            open: false,
            ..Default::default()
        };
        assert!(can_sign_up(&cfg, &ctx, Utc::now()).is_ok());
    }

    #[test]
    fn denial_order_is_closed_roster_teammate_cooldown() {
        let mut cfg = config();
        cfg.prevent_unregistered = true;
        cfg.prevent_groups = true;
        cfg.cooldown_seconds = 600;
        let now = Utc::now();
        let mut ctx = SignupContext {
            registered: false,
            teammate_active: true,
            last_helped: Some(now),
            ..Default::default()
        };
        assert_eq!(can_sign_up(&cfg, &ctx, now), Err(SignupDenial::Closed));
        ctx.open = true;
        assert_eq!(
            can_sign_up(&cfg, &ctx, now),
            Err(SignupDenial::NotRegistered)
        );
        ctx.registered = true;
        assert_eq!(
            can_sign_up(&cfg, &ctx, now),
            Err(SignupDenial::TeammateActive)
        );
        ctx.teammate_active = false;
        assert!(matches!(
            can_sign_up(&cfg, &ctx, now),
            Err(SignupDenial::Cooldown { .. })
        ));
        ctx.last_helped = None;
        assert!(can_sign_up(&cfg, &ctx, now).is_ok());
    }

    #[test]
    fn cooldown_counts_down_from_the_helped_time() {
        let mut cfg = config();
        cfg.cooldown_seconds = 60;
        let helped_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let ctx = SignupContext {
            open: true,
            last_helped: Some(helped_at),
            ..Default::default()
        };
        let denial = can_sign_up(&cfg, &ctx, helped_at + chrono::Duration::seconds(30));
        assert_eq!(
            denial,
            Err(SignupDenial::Cooldown {
                remaining_seconds: 30
            })
        );
        assert_eq!(
            denial.unwrap_err().message(),
            "Try again in 30 seconds"
        );
        assert!(
            can_sign_up(&cfg, &ctx, helped_at + chrono::Duration::seconds(60)).is_ok(),
            "cooldown expires exactly at the boundary"
        );
    }

    #[test]
    fn cooldown_phrasing() {
        assert_eq!(cooldown_phrase(1), "1 seconds");
        assert_eq!(cooldown_phrase(45), "45 seconds");
        assert_eq!(cooldown_phrase(60), "a minute");
        assert_eq!(cooldown_phrase(61), "2 minutes");
        assert_eq!(cooldown_phrase(600), "10 minutes");
    }

    #[test]
    fn priority_boost_rules() {
        let mut cfg = config();
        assert_eq!(new_entry_priority(&cfg, false, false), 0);
        cfg.prioritize_new = true;
        assert_eq!(new_entry_priority(&cfg, false, false), 1);
        assert_eq!(new_entry_priority(&cfg, true, false), 0);
        // Teammate boost consumption only applies with the flag.
        assert_eq!(new_entry_priority(&cfg, false, true), 1);
        cfg.prevent_groups_boost = true;
        assert_eq!(new_entry_priority(&cfg, false, true), 0);
    }

    #[test]
    fn sort_layers_pinned_helping_priority_id() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let ids: Vec<Tid> = (0..5)
            .map(|i| Tid::at(t0 + chrono::Duration::seconds(i)))
            .collect();
        let mut entries = vec![
            entry(false, "", 0, ids[4]),
            entry(false, "", 2, ids[3]),
            entry(false, " Alice", 0, ids[2]),
            entry(true, "", 0, ids[1]),
            entry(false, "", 2, ids[0]),
        ];
        sort_for_display(&mut entries);
        let order: Vec<Tid> = entries.iter().map(|e| e.id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0], ids[3], ids[4]]);

        // Idempotent: sorting again changes nothing.
        let before = order.clone();
        sort_for_display(&mut entries);
        let after: Vec<Tid> = entries.iter().map(|e| e.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn free_text_descriptions() {
        assert!(validate_description(&[], "stuck on part 2").is_ok());
        assert!(validate_description(&[], "").is_err());
        assert!(validate_description(&[], "   ").is_err());
        assert!(validate_description(&[], "[\"sneaky\"]").is_err());
        assert!(validate_description(&[], "{\"a\":1}").is_err());
        // Scalars that happen to parse as JSON are fine as free text.
        assert!(validate_description(&[], "42").is_ok());
        assert!(validate_description(&[], &"x".repeat(MAX_DESCRIPTION_LEN + 1)).is_err());
    }

    #[test]
    fn prompted_descriptions() {
        let prompts = vec!["A".to_string(), "B".to_string()];
        assert!(validate_description(&prompts, r#"["one","two"]"#).is_ok());
        let err = validate_description(&prompts, r#"["only one"]"#).unwrap_err();
        assert!(err.contains("expected 2"), "{err}");
        assert!(err.contains("got 1"), "{err}");
        assert!(validate_description(&prompts, r#"["one","  "]"#).is_err());
        assert!(validate_description(&prompts, "free text").is_err());
    }

    #[test]
    fn prompted_descriptions_round_trip() {
        let prompts = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let answers = vec!["x".to_string(), "y z".to_string(), "w".to_string()];
        let encoded = serde_json::to_string(&answers).unwrap();
        assert!(validate_description(&prompts, &encoded).is_ok());
        let decoded: Vec<String> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, answers);
    }

    #[test]
    fn week_schedule_shape() {
        let ok = vec!["o".repeat(48); 7];
        assert!(validate_week_schedule(&ok).is_ok());
        assert!(validate_week_schedule(&ok[..6]).is_err());
        let mut short = ok.clone();
        short[3] = "o".repeat(47);
        assert!(validate_week_schedule(&short).is_err());
        let mut bad_char = ok;
        bad_char[0] = format!("x{}", "o".repeat(47));
        assert!(validate_week_schedule(&bad_char).is_err());
    }

    #[test]
    fn prompt_lists_reject_duplicates() {
        assert!(validate_prompts(&["A".into(), "B".into()]).is_ok());
        assert!(validate_prompts(&["A".into(), "A".into()]).is_err());
        assert!(validate_prompts(&["  ".into()]).is_err());
    }
}
