// ABOUTME: Advanced per-segment derived features - Minetti cost, cardiac drift, cadence decay
// ABOUTME: Computed from stored segment rows in a later pass, written onto segment_features
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::database::Database;
use crate::models::ActivitySegment;
use crate::segmentation::BatchSummary;
use anyhow::Result;
use tracing::{error, info};
use uuid::Uuid;

/// Minetti metabolic cost of running at a grade, J/(kg·m).
///
/// Fifth-order polynomial fit over the gradient as a fraction
/// (Minetti et al. 2002, -0.45..0.45 validity range).
#[must_use]
pub fn minetti_cost(grade_percent: f64) -> f64 {
    let i = (grade_percent / 100.0).clamp(-0.45, 0.45);
    155.4 * i.powi(5) - 30.4 * i.powi(4) - 43.3 * i.powi(3) + 46.3 * i.powi(2) + 19.5 * i + 3.6
}

/// Derived fields for one segment given activity-level baselines
#[derive(Debug, Clone, Default)]
pub struct AdvancedFeatures {
    pub minetti_cost: Option<f64>,
    pub cardiac_drift: Option<f64>,
    pub cadence_decay: Option<f64>,
    pub grade_variability: Option<f64>,
    pub efficiency_factor: Option<f64>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        None
    } else {
        Some(collected.iter().sum::<f64>() / collected.len() as f64)
    }
}

/// Compute the advanced features for every segment of an activity.
///
/// Baselines come from the activity itself: cardiac drift is relative to
/// the first-half average heart rate, cadence decay to the opening
/// segment's cadence, grade variability to the activity mean grade.
#[must_use]
pub fn derive_features(segments: &[ActivitySegment]) -> Vec<(Uuid, AdvancedFeatures)> {
    if segments.is_empty() {
        return Vec::new();
    }

    let half = (segments.len() / 2).max(1);
    let first_half_hr = mean(segments[..half].iter().filter_map(|s| s.avg_hr));
    let baseline_cadence = segments.iter().find_map(|s| s.avg_cadence);
    let mean_grade = mean(segments.iter().filter_map(|s| s.avg_grade_percent));

    segments
        .iter()
        .map(|segment| {
            let cardiac_drift = match (segment.avg_hr, first_half_hr) {
                (Some(hr), Some(baseline)) if baseline > 0.0 => Some(hr / baseline - 1.0),
                _ => None,
            };
            let cadence_decay = match (segment.avg_cadence, baseline_cadence) {
                (Some(cadence), Some(baseline)) if baseline > 0.0 => {
                    Some(cadence / baseline - 1.0)
                }
                _ => None,
            };
            let grade_variability = match (segment.avg_grade_percent, mean_grade) {
                (Some(grade), Some(mean_grade)) => Some((grade - mean_grade).abs()),
                _ => None,
            };
            // EF: meters per minute per heartbeat
            let efficiency_factor = segment.avg_hr.and_then(|hr| {
                if hr > 0.0 && segment.elapsed_time_s > 0.0 {
                    Some((segment.distance_m / (segment.elapsed_time_s / 60.0)) / hr)
                } else {
                    None
                }
            });

            let features = AdvancedFeatures {
                minetti_cost: segment.avg_grade_percent.map(minetti_cost),
                cardiac_drift,
                cadence_decay,
                grade_variability,
                efficiency_factor,
            };
            (segment.id, features)
        })
        .collect()
}

/// Compute and persist advanced features for one activity's segments.
///
/// Returns the number of feature rows updated; 0 when the activity has no
/// segments.
///
/// # Errors
///
/// Returns an error if a query or update fails
pub async fn compute_activity_features(database: &Database, activity_id: Uuid) -> Result<usize> {
    let segments = database.segments_for_activity(activity_id).await?;
    if segments.is_empty() {
        return Ok(0);
    }

    let derived = derive_features(&segments);
    let count = derived.len();
    for (segment_id, features) in derived {
        database
            .update_advanced_features(
                segment_id,
                features.minetti_cost,
                features.cardiac_drift,
                features.cadence_decay,
                features.grade_variability,
                features.efficiency_factor,
            )
            .await?;
    }

    info!("advanced features computed for activity {activity_id}: {count} segments");
    Ok(count)
}

/// Run the derived-features pass over every segmented activity.
///
/// # Errors
///
/// Returns an error if the activity listing fails; per-activity failures
/// are counted, not propagated
pub async fn compute_all_features(
    database: &Database,
    user_id: Option<Uuid>,
) -> Result<BatchSummary> {
    let activities = database.activities_with_streams(user_id).await?;

    let mut summary = BatchSummary::default();
    for activity in &activities {
        match compute_activity_features(database, activity.id).await {
            Ok(0) => summary.skipped += 1,
            Ok(_) => summary.processed += 1,
            Err(e) => {
                error!("feature computation failed for activity {}: {e}", activity.id);
                summary.errors += 1;
            }
        }
    }
    Ok(summary)
}
