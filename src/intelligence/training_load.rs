// ABOUTME: Daily training load - intensity proxy and Edwards TRIMP through Banister recursions
// ABOUTME: Windows are computed from scratch so recomputation is byte-for-byte idempotent
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::constants::training_load::{ATL_DAYS, CTL_DAYS, EDWARDS_FLOOR};
use crate::database::Database;
use crate::models::{streams, Activity, TrainingLoadDay, User};
use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Edwards zone coefficient for a heart-rate fraction of max.
///
/// 0 below 50 % of max, then 1 through 5 for the successive
/// 10-percentage-point bands up to 100 %.
#[must_use]
pub fn edwards_zone_coefficient(ratio: f64) -> f64 {
    if ratio < EDWARDS_FLOOR {
        0.0
    } else if ratio < 0.6 {
        1.0
    } else if ratio < 0.7 {
        2.0
    } else if ratio < 0.8 {
        3.0
    } else if ratio < 0.9 {
        4.0
    } else {
        5.0
    }
}

/// Edwards TRIMP over the heart-rate stream of one activity.
///
/// Each sample contributes `(sample_duration / 60) * zone_coefficient`.
/// Returns `None` without heart-rate data or when every sample sits below
/// 50 % of max.
#[must_use]
pub fn edwards_trimp(streams_map: &Map<String, Value>, max_hr: f64) -> Option<f64> {
    if max_hr <= 0.0 {
        return None;
    }
    let hr = streams::numeric_series(streams_map, "heartrate")?;
    let time = streams::required_numeric_series(streams_map, "time")?;
    let n = hr.len().min(time.len());
    if n < 2 {
        return None;
    }

    let mut total = 0.0;
    for i in 1..n {
        let dt = time[i] - time[i - 1];
        if dt <= 0.0 {
            continue;
        }
        if let Some(sample_hr) = hr[i] {
            total += (dt / 60.0) * edwards_zone_coefficient(sample_hr / max_hr);
        }
    }

    if total > 0.0 {
        Some(total)
    } else {
        None
    }
}

/// Max heart rate to score an activity against: the user's configured value
/// wins, the activity's own recorded max is the fallback.
#[must_use]
pub fn resolve_max_hr(user: Option<&User>, activity: &Activity) -> Option<f64> {
    user.and_then(|u| u.max_heart_rate).or(activity.max_heartrate)
}

/// Exponentially-weighted Banister series over daily loads, seeded at zero.
///
/// `series[d] = series[d-1] * exp(-1/tau) + load[d] * (1 - exp(-1/tau))`
#[must_use]
pub fn banister_series(daily_loads: &[f64], tau_days: f64) -> Vec<f64> {
    let decay = (-1.0 / tau_days).exp();
    let mut out = Vec::with_capacity(daily_loads.len());
    let mut previous = 0.0;
    for load in daily_loads {
        let value = previous * decay + load * (1.0 - decay);
        out.push(value);
        previous = value;
    }
    out
}

/// Compute and upsert one [`TrainingLoadDay`] per calendar day in
/// `[from, to]`.
///
/// The intensity-proxy series aggregates `avg_hr * distance_km` over each
/// day's segments; the Edwards series sums per-activity TRIMPs. Rest days
/// carry zero load so the recursions decay. When no max-heart-rate source
/// exists anywhere in the window, every Edwards field stays null.
///
/// # Errors
///
/// Returns an error if a query or upsert fails
pub async fn compute_training_load(
    database: &Database,
    user_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<TrainingLoadDay>> {
    if from > to {
        anyhow::bail!("training-load window is inverted: {from} > {to}");
    }

    let user = database.get_user(user_id).await?;
    let window_start = Utc
        .from_utc_datetime(&from.and_hms_opt(0, 0, 0).unwrap_or_default());
    let window_end = Utc.from_utc_datetime(
        &(to + chrono::Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default(),
    );
    let activities = database
        .activities_for_user_between(user_id, window_start, window_end)
        .await?;

    let day_count = (to - from).num_days() as usize + 1;
    let mut intensity_by_day: HashMap<NaiveDate, f64> = HashMap::new();
    let mut edwards_by_day: HashMap<NaiveDate, f64> = HashMap::new();
    let mut edwards_source_known = false;

    for activity in &activities {
        let day = activity.start_date.date_naive();

        if let Some(proxy) = database.activity_intensity_proxy(activity.id).await? {
            *intensity_by_day.entry(day).or_insert(0.0) += proxy;
        }

        if let Some(max_hr) = resolve_max_hr(user.as_ref(), activity) {
            edwards_source_known = true;
            if let Some(streams_map) = activity.streams_object() {
                if let Some(trimp) = edwards_trimp(&streams_map, max_hr) {
                    *edwards_by_day.entry(day).or_insert(0.0) += trimp;
                }
            }
        }
    }

    let dates: Vec<NaiveDate> = (0..day_count)
        .map(|offset| from + chrono::Duration::days(offset as i64))
        .collect();
    let intensity_loads: Vec<f64> = dates
        .iter()
        .map(|d| intensity_by_day.get(d).copied().unwrap_or(0.0))
        .collect();
    let edwards_loads: Vec<f64> = dates
        .iter()
        .map(|d| edwards_by_day.get(d).copied().unwrap_or(0.0))
        .collect();

    let ctl = banister_series(&intensity_loads, CTL_DAYS);
    let atl = banister_series(&intensity_loads, ATL_DAYS);
    let ctl_edwards = banister_series(&edwards_loads, CTL_DAYS);
    let atl_edwards = banister_series(&edwards_loads, ATL_DAYS);

    let mut days = Vec::with_capacity(day_count);
    for (i, date) in dates.iter().enumerate() {
        let rhr_today = database.resting_heart_rate(user_id, *date).await?;
        let rhr_week_ago = database
            .resting_heart_rate(user_id, *date - chrono::Duration::days(7))
            .await?;
        let rhr_delta_7d = match (rhr_today, rhr_week_ago) {
            (Some(today), Some(week_ago)) => Some(today - week_ago),
            _ => None,
        };

        let day = TrainingLoadDay {
            user_id,
            date: *date,
            ctl_42d: Some(ctl[i]),
            atl_7d: Some(atl[i]),
            tsb: Some(ctl[i] - atl[i]),
            edwards_trimp_daily: if edwards_source_known {
                Some(edwards_loads[i])
            } else {
                None
            },
            ctl_42d_edwards: edwards_source_known.then(|| ctl_edwards[i]),
            atl_7d_edwards: edwards_source_known.then(|| atl_edwards[i]),
            tsb_edwards: edwards_source_known.then(|| ctl_edwards[i] - atl_edwards[i]),
            rhr_delta_7d,
        };
        database.upsert_training_load_day(&day).await?;
        days.push(day);
    }

    info!("training load computed for user {user_id}: {} days", days.len());
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn streams_with_hr(hr: &[i64], time: &[i64]) -> Map<String, Value> {
        let value = json!({
            "heartrate": {"data": hr},
            "time": {"data": time},
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn zone_coefficients_follow_decile_bands() {
        assert_eq!(edwards_zone_coefficient(0.40), 0.0);
        assert_eq!(edwards_zone_coefficient(0.49), 0.0);
        assert_eq!(edwards_zone_coefficient(0.50), 1.0);
        assert_eq!(edwards_zone_coefficient(0.69), 2.0);
        assert_eq!(edwards_zone_coefficient(0.75), 3.0);
        assert_eq!(edwards_zone_coefficient(0.89), 4.0);
        assert_eq!(edwards_zone_coefficient(0.95), 5.0);
        assert_eq!(edwards_zone_coefficient(1.0), 5.0);
    }

    #[test]
    fn trimp_scores_constant_zone_one_minute() {
        // 55% of max for 60 seconds: (60/60) * 1 = 1.0
        let hr = vec![110i64; 61];
        let time: Vec<i64> = (0..61).collect();
        let map = streams_with_hr(&hr, &time);
        let trimp = edwards_trimp(&map, 200.0).unwrap();
        assert!((trimp - 1.0).abs() < 0.01);
    }

    #[test]
    fn trimp_mixes_zones() {
        // 30s at 65% (zone 2) then 30s at 85% (zone 4): 1.0 + 2.0
        let mut hr = vec![130i64; 31];
        hr.extend(vec![170i64; 30]);
        let time: Vec<i64> = (0..61).collect();
        let map = streams_with_hr(&hr, &time);
        let trimp = edwards_trimp(&map, 200.0).unwrap();
        assert!((trimp - 3.0).abs() < 0.01);
    }

    #[test]
    fn trimp_below_floor_is_none() {
        let hr = vec![80i64; 61]; // 40% of 200
        let time: Vec<i64> = (0..61).collect();
        let map = streams_with_hr(&hr, &time);
        assert!(edwards_trimp(&map, 200.0).is_none());
    }

    #[test]
    fn trimp_requires_heart_rate_stream() {
        let value = json!({"time": {"data": [0, 60]}});
        let Value::Object(map) = value else { unreachable!() };
        assert!(edwards_trimp(&map, 200.0).is_none());
    }

    #[test]
    fn banister_matches_closed_form_for_impulse() {
        // Loads [100, 0, 0, 0, 0]
        let loads = [100.0, 0.0, 0.0, 0.0, 0.0];
        let ctl = banister_series(&loads, 42.0);
        let atl = banister_series(&loads, 7.0);

        let k42 = (-1.0f64 / 42.0).exp();
        let k7 = (-1.0f64 / 7.0).exp();
        let ctl0 = 100.0 * (1.0 - k42);
        let atl0 = 100.0 * (1.0 - k7);

        assert!((ctl[0] - ctl0).abs() < 1e-9);
        assert!((ctl[4] - ctl0 * (-4.0f64 / 42.0).exp()).abs() < 1e-9);
        assert!((atl[0] - atl0).abs() < 1e-9);
        assert!((atl[4] - atl0 * (-4.0f64 / 7.0).exp()).abs() < 1e-9);

        let tsb4 = ctl[4] - atl[4];
        let expected = ctl0 * k42.powi(4) - atl0 * k7.powi(4);
        assert!((tsb4 - expected).abs() < 1e-9);
    }

    #[test]
    fn user_configured_max_hr_wins() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@b.c".into(),
            display_name: None,
            max_heart_rate: Some(200.0),
            created_at: now,
        };
        let activity = Activity {
            id: Uuid::new_v4(),
            user_id: user.id,
            strava_id: Some(1),
            device_activity_id: None,
            name: "run".into(),
            activity_type: crate::models::ActivityType::Run,
            start_date: now,
            start_date_local: None,
            distance: 0.0,
            moving_time: 0,
            elapsed_time: 0,
            total_elevation_gain: 0.0,
            average_speed: None,
            max_speed: None,
            average_heartrate: None,
            max_heartrate: Some(150.0),
            average_cadence: None,
            average_watts: None,
            max_watts: None,
            summary_polyline: None,
            polyline: None,
            streams: None,
            laps: None,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(resolve_max_hr(Some(&user), &activity), Some(200.0));

        let user_without = User {
            max_heart_rate: None,
            ..user
        };
        assert_eq!(resolve_max_hr(Some(&user_without), &activity), Some(150.0));
    }
}
