use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Deserialize;

/// Meta key prefix for the legacy one-entry-per-course progress records.
pub const LEGACY_PROGRESS_PREFIX: &str = "course_progress_";
/// Meta key holding the native enrollment blob, a JSON map keyed by course id.
pub const NATIVE_ENROLLMENTS_KEY: &str = "course_enrollments";

/// Legacy progress record: `{"completion_rate": 60.0}`.
#[derive(Debug, Deserialize)]
struct LegacyProgress {
    completion_rate: f64,
}

/// Native enrollment entry: `{"completed": 3, "total": 5}` step counts.
#[derive(Debug, Deserialize)]
struct NativeEnrollment {
    completed: i64,
    total: i64,
}

/// Course metrics derived for one user after merging both progress sources.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseMetrics {
    pub enrolled_courses: i64,
    pub completed_courses: i64,
    pub in_progress_courses: i64,
    pub avg_progress: f64,
}

impl CourseMetrics {
    pub fn empty() -> Self {
        Self {
            enrolled_courses: 0,
            completed_courses: 0,
            in_progress_courses: 0,
            avg_progress: 0.0,
        }
    }
}

/// Merge the legacy per-course records and the native enrollment blob from a
/// user's metadata into one percentage per distinct course id.
///
/// A course present in both sources is counted once; the legacy record wins
/// since it stores the completion rate directly. Records that fail to parse
/// are treated as no progress for that course. Percentages are clamped to
/// [0, 100].
pub fn merge_course_progress(meta: &HashMap<String, String>) -> BTreeMap<i64, f64> {
    let mut courses = BTreeMap::new();

    if let Some(raw) = meta.get(NATIVE_ENROLLMENTS_KEY) {
        if let Ok(blob) = serde_json::from_str::<HashMap<String, NativeEnrollment>>(raw) {
            for (key, enrollment) in blob {
                let Ok(course_id) = key.parse::<i64>() else {
                    continue;
                };
                let pct = if enrollment.total <= 0 {
                    0.0
                } else {
                    enrollment.completed as f64 / enrollment.total as f64 * 100.0
                };
                courses.insert(course_id, pct.clamp(0.0, 100.0));
            }
        }
    }

    for (key, raw) in meta {
        let Some(suffix) = key.strip_prefix(LEGACY_PROGRESS_PREFIX) else {
            continue;
        };
        let Ok(course_id) = suffix.parse::<i64>() else {
            continue;
        };
        match serde_json::from_str::<LegacyProgress>(raw) {
            Ok(record) => {
                courses.insert(course_id, record.completion_rate.clamp(0.0, 100.0));
            }
            Err(_) => {
                // Malformed legacy blob: no progress for this course, but the
                // enrollment still counts if the native source knows it.
                courses.entry(course_id).or_insert(0.0);
            }
        }
    }

    courses
}

/// Collapse per-course percentages into the summary counters.
pub fn course_metrics(courses: &BTreeMap<i64, f64>) -> CourseMetrics {
    let enrolled = courses.len() as i64;
    if enrolled == 0 {
        return CourseMetrics::empty();
    }

    let completed = courses.values().filter(|pct| **pct >= 100.0).count() as i64;
    let avg = courses.values().sum::<f64>() / enrolled as f64;

    CourseMetrics {
        enrolled_courses: enrolled,
        completed_courses: completed,
        in_progress_courses: (enrolled - completed).max(0),
        avg_progress: round2(avg),
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
