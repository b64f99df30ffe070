// ABOUTME: Segmentation engine - slices activity streams into ~100 m segments with features
// ABOUTME: Re-segmentation replaces prior rows atomically; malformed streams are skipped silently
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::constants::segmentation::SEGMENT_LENGTH_M;
use crate::database::Database;
use crate::models::{streams, Activity, ActivitySegment, SegmentFeatures};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of a batch segmentation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Mean of the non-null samples in `values[start..=end]`
fn slice_mean(values: Option<&Vec<Option<f64>>>, start: usize, end: usize) -> Option<f64> {
    let values = values?;
    if values.len() <= end {
        return None;
    }
    let samples: Vec<f64> = values[start..=end].iter().flatten().copied().collect();
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Positive and negative altitude deltas over `altitude[start..=end]`
fn slice_elevation(
    altitude: Option<&Vec<Option<f64>>>,
    start: usize,
    end: usize,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let Some(altitude) = altitude else {
        return (None, None, None);
    };
    if altitude.len() <= end {
        return (None, None, None);
    }

    let mean = slice_mean(Some(altitude), start, end);
    let mut gain = 0.0;
    let mut loss = 0.0;
    for j in (start + 1)..=end {
        if let (Some(prev), Some(curr)) = (altitude[j - 1], altitude[j]) {
            let diff = curr - prev;
            if diff > 0.0 {
                gain += diff;
            } else {
                loss += diff.abs();
            }
        }
    }
    (Some(gain), Some(loss), mean)
}

/// Midpoint GPS position of `latlng[start..=end]`
fn slice_midpoint(
    latlng: Option<&Vec<Value>>,
    start: usize,
    end: usize,
) -> (Option<f64>, Option<f64>) {
    let Some(latlng) = latlng else {
        return (None, None);
    };
    if latlng.len() <= end {
        return (None, None);
    }
    let mid = (start + end) / 2;
    if let Value::Array(pair) = &latlng[mid] {
        if pair.len() == 2 {
            return (pair[0].as_f64(), pair[1].as_f64());
        }
    }
    (None, None)
}

/// Sample-index boundaries of the ~100 m slices.
///
/// A slice with non-positive distance produces no boundary; the anchor
/// still advances past it. A final remainder shorter than the segment
/// length folds into the preceding adjacent slice instead of becoming a
/// stub segment of its own.
fn slice_boundaries(distance: &[f64], n: usize) -> Vec<(usize, usize)> {
    let mut boundaries: Vec<(usize, usize)> = Vec::new();
    let mut seg_start_idx = 0usize;

    for i in 1..n {
        let seg_dist = distance[i] - distance[seg_start_idx];
        if seg_dist < SEGMENT_LENGTH_M && i != n - 1 {
            continue;
        }

        if seg_dist <= 0.0 {
            seg_start_idx = i;
            continue;
        }
        boundaries.push((seg_start_idx, i));
        seg_start_idx = i;
    }

    if boundaries.len() >= 2 {
        let (last_start, last_end) = boundaries[boundaries.len() - 1];
        let (prev_start, prev_end) = boundaries[boundaries.len() - 2];
        let last_dist = distance[last_end] - distance[last_start];
        if last_dist < SEGMENT_LENGTH_M && prev_end == last_start {
            boundaries.truncate(boundaries.len() - 2);
            boundaries.push((prev_start, last_end));
        }
    }

    boundaries
}

/// Slice a streams map into contiguous ~100 m segments plus their cumulative
/// features.
///
/// Returns `None` when the streams lack usable distance/time series.
#[must_use]
pub fn build_segments(
    activity_id: Uuid,
    user_id: Uuid,
    streams_map: &Map<String, Value>,
) -> Option<(Vec<ActivitySegment>, Vec<SegmentFeatures>)> {
    let distance = streams::required_numeric_series(streams_map, "distance")?;
    let time = streams::required_numeric_series(streams_map, "time")?;
    let n = distance.len().min(time.len());
    if n < 2 {
        return None;
    }

    let hr = streams::numeric_series(streams_map, "heartrate");
    let cadence = streams::numeric_series(streams_map, "cadence");
    let grade = streams::numeric_series(streams_map, "grade_smooth");
    let altitude = streams::numeric_series(streams_map, "altitude");
    let latlng = streams::series(streams_map, "latlng");

    let total_distance = distance[n - 1];
    let now = Utc::now();

    let mut segments = Vec::new();
    let mut features = Vec::new();

    let mut cumulative_elev_gain = 0.0;
    let mut cumulative_elev_loss = 0.0;
    let mut cumulative_time_s = 0.0;

    for (segment_index, (seg_start_idx, seg_end_idx)) in
        slice_boundaries(&distance, n).into_iter().enumerate()
    {
        let dist_m = distance[seg_end_idx] - distance[seg_start_idx];
        let elapsed_s = time[seg_end_idx] - time[seg_start_idx];

        let pace = (elapsed_s / 60.0) / (dist_m / 1000.0);
        let avg_hr = slice_mean(hr.as_ref(), seg_start_idx, seg_end_idx);
        let avg_cadence = slice_mean(cadence.as_ref(), seg_start_idx, seg_end_idx);
        let avg_grade = slice_mean(grade.as_ref(), seg_start_idx, seg_end_idx);
        let (elev_gain, elev_loss, alt_mean) =
            slice_elevation(altitude.as_ref(), seg_start_idx, seg_end_idx);
        let (lat, lon) = slice_midpoint(latlng, seg_start_idx, seg_end_idx);

        let segment = ActivitySegment {
            id: Uuid::new_v4(),
            activity_id,
            user_id,
            segment_index: segment_index as i64,
            distance_m: dist_m,
            elapsed_time_s: elapsed_s,
            avg_grade_percent: avg_grade,
            elevation_gain_m: elev_gain,
            elevation_loss_m: elev_loss,
            altitude_m: alt_mean,
            avg_hr,
            avg_cadence,
            lat,
            lon,
            pace_min_per_km: Some(pace),
            created_at: now,
        };

        cumulative_elev_gain += elev_gain.unwrap_or(0.0);
        cumulative_elev_loss += elev_loss.unwrap_or(0.0);
        cumulative_time_s += elapsed_s;

        let race_pct = if total_distance > 0.0 {
            Some(distance[seg_end_idx] / total_distance * 100.0)
        } else {
            None
        };

        features.push(SegmentFeatures {
            id: Uuid::new_v4(),
            segment_id: segment.id,
            activity_id,
            cumulative_distance_km: distance[seg_end_idx] / 1000.0,
            elapsed_time_min: cumulative_time_s / 60.0,
            cumulative_elev_gain_m: Some(cumulative_elev_gain),
            cumulative_elev_loss_m: Some(cumulative_elev_loss),
            race_completion_pct: race_pct,
            intensity_proxy: avg_hr.map(|hr| hr * (dist_m / 1000.0)),
            minetti_cost: None,
            cardiac_drift: None,
            cadence_decay: None,
            grade_variability: None,
            efficiency_factor: None,
            created_at: now,
        });
        segments.push(segment);
    }

    Some((segments, features))
}

/// Segment one activity, replacing any prior segments.
///
/// Returns the number of segments created; 0 when the activity has no
/// usable streams (absent, the legacy `"null"` sentinel, or too short).
///
/// # Errors
///
/// Returns an error if persistence fails; the transaction rolls back
pub async fn segment_activity(database: &Database, activity: &Activity) -> Result<usize> {
    let Some(streams_map) = activity.streams_object() else {
        warn!("activity {}: streams absent or null, skipping segmentation", activity.id);
        return Ok(0);
    };

    let Some((segments, features)) = build_segments(activity.id, activity.user_id, &streams_map)
    else {
        warn!("activity {}: distance/time data insufficient, skipping segmentation", activity.id);
        return Ok(0);
    };

    let count = segments.len();
    database.replace_segments(activity.id, &segments, &features).await?;
    info!("activity {}: {count} segments created", activity.id);
    Ok(count)
}

/// Segment every enriched activity that has no segments yet.
///
/// # Errors
///
/// Returns an error if the activity listing itself fails; per-activity
/// failures are counted, not propagated
pub async fn segment_all_enriched(
    database: &Database,
    user_id: Option<Uuid>,
) -> Result<BatchSummary> {
    let activities = database.activities_with_streams(user_id).await?;

    let mut summary = BatchSummary::default();
    for activity in &activities {
        if database.is_activity_segmented(activity.id).await? {
            summary.skipped += 1;
            continue;
        }
        match segment_activity(database, activity).await {
            Ok(0) => summary.skipped += 1,
            Ok(_) => summary.processed += 1,
            Err(e) => {
                error!("segmentation failed for activity {}: {e}", activity.id);
                summary.errors += 1;
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn streams_fixture(distance: &[f64], time: &[f64]) -> Map<String, Value> {
        let value = json!({
            "distance": {"data": distance},
            "time": {"data": time},
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn spec_walkthrough_produces_two_segments() {
        let map = streams_fixture(&[0.0, 40.0, 80.0, 120.0, 250.0, 260.0], &[0.0, 10.0, 20.0, 30.0, 60.0, 70.0]);
        let (segments, features) =
            build_segments(Uuid::new_v4(), Uuid::new_v4(), &map).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].segment_index, 0);
        assert_eq!(segments[1].segment_index, 1);
        assert!((segments[0].distance_m - 120.0).abs() < 1e-9);
        assert!((segments[1].distance_m - 140.0).abs() < 1e-9);
        assert!((segments[0].elapsed_time_s - 30.0).abs() < 1e-9);
        assert!((segments[1].elapsed_time_s - 40.0).abs() < 1e-9);

        // pace = (elapsed/60) / (distance/1000)
        let pace0 = (30.0 / 60.0) / (120.0 / 1000.0);
        assert!((segments[0].pace_min_per_km.unwrap() - pace0).abs() < 1e-9);

        assert!((features[0].cumulative_distance_km - 0.12).abs() < 1e-9);
        assert!((features[1].cumulative_distance_km - 0.26).abs() < 1e-9);
        assert!((features[1].race_completion_pct.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_distance_slice_advances_anchor_without_segment() {
        // 100 m of movement, then a dead stretch to the final sample
        let map = streams_fixture(&[0.0, 100.0, 100.0], &[0.0, 30.0, 60.0]);
        let (segments, _) = build_segments(Uuid::new_v4(), Uuid::new_v4(), &map).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].segment_index, 0);
        assert!(segments.iter().all(|s| s.distance_m > 0.0));
    }

    #[test]
    fn resegmentation_is_deterministic() {
        let map = streams_fixture(&[0.0, 40.0, 80.0, 120.0, 250.0, 260.0], &[0.0, 10.0, 20.0, 30.0, 60.0, 70.0]);
        let activity_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let (first, _) = build_segments(activity_id, user_id, &map).unwrap();
        let (second, _) = build_segments(activity_id, user_id, &map).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.segment_index, b.segment_index);
            assert_eq!(a.distance_m, b.distance_m);
            assert_eq!(a.elapsed_time_s, b.elapsed_time_s);
            assert_eq!(a.pace_min_per_km, b.pace_min_per_km);
        }
    }

    #[test]
    fn too_short_streams_are_rejected() {
        let map = streams_fixture(&[0.0], &[0.0]);
        assert!(build_segments(Uuid::new_v4(), Uuid::new_v4(), &map).is_none());
    }

    #[test]
    fn segment_distance_bounded_by_sample_delta() {
        // Largest single-sample delta is 130 m
        let map = streams_fixture(&[0.0, 40.0, 80.0, 120.0, 250.0, 260.0], &[0.0, 10.0, 20.0, 30.0, 60.0, 70.0]);
        let (segments, _) = build_segments(Uuid::new_v4(), Uuid::new_v4(), &map).unwrap();
        for segment in &segments {
            assert!(segment.distance_m <= SEGMENT_LENGTH_M + 130.0);
        }
    }

    #[test]
    fn optional_series_feed_segment_averages() {
        let value = json!({
            "distance": {"data": [0.0, 60.0, 120.0]},
            "time": {"data": [0.0, 20.0, 40.0]},
            "heartrate": {"data": [140, 150, 160]},
            "altitude": {"data": [100.0, 104.0, 102.0]},
            "latlng": {"data": [[45.0, 6.0], [45.1, 6.1], [45.2, 6.2]]}
        });
        let Value::Object(map) = value else { unreachable!() };
        let (segments, features) = build_segments(Uuid::new_v4(), Uuid::new_v4(), &map).unwrap();

        assert_eq!(segments.len(), 1);
        assert!((segments[0].avg_hr.unwrap() - 150.0).abs() < 1e-9);
        assert!((segments[0].elevation_gain_m.unwrap() - 4.0).abs() < 1e-9);
        assert!((segments[0].elevation_loss_m.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(segments[0].lat, Some(45.1));
        // intensity proxy = avg_hr * distance_km
        assert!((features[0].intensity_proxy.unwrap() - 150.0 * 0.12).abs() < 1e-9);
    }
}
