//! Department allocation (§4.3 step 10).
//!
//! Grounded in `original_source/Agents/QueryAnalyst/tools/department_allocator.py`, which
//! scores candidate departments with `(embedding <=> vec) * 0.6 + (geo_distance_km / 100) *
//! 0.4` and orders ascending (lower is better). `ALPHA` is the literal default from that
//! file -- spec.md names the formula shape but not the weight, so the original is the
//! source of truth for the constant.

use crate::types::DepartmentMatch;

pub const ALPHA: f64 = 0.6;
const GEO_NORMALIZATION_KM: f64 = 100.0;
const EARTH_RADIUS_KM: f64 = 6371.0;

pub struct DepartmentCandidate {
    pub department_id: uuid::Uuid,
    pub name: String,
    pub jurisdiction: Option<String>,
    pub embedding: Vec<f32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b)) as f64
}

/// Name/jurisdiction LIKE filters, applied before scoring (§4.3 step 10: "subject to
/// name/jurisdiction LIKE filters").
pub fn matches_filters(candidate: &DepartmentCandidate, name_filter: Option<&str>, jurisdiction_filter: Option<&str>) -> bool {
    let name_ok = name_filter.map(|f| candidate.name.to_lowercase().contains(&f.to_lowercase())).unwrap_or(true);
    let jurisdiction_ok = jurisdiction_filter
        .map(|f| candidate.jurisdiction.as_deref().unwrap_or("").to_lowercase().contains(&f.to_lowercase()))
        .unwrap_or(true);
    name_ok && jurisdiction_ok
}

/// Score and pick the top-1 department. Falls back to embedding-only scoring when either
/// the grievance or a candidate lacks coordinates, per "else embedding-only."
pub fn allocate(
    grievance_embedding: &[f32],
    grievance_lat: Option<f64>,
    grievance_lon: Option<f64>,
    candidates: &[DepartmentCandidate],
) -> Option<DepartmentMatch> {
    candidates
        .iter()
        .map(|candidate| {
            let embedding_distance = cosine_distance(grievance_embedding, &candidate.embedding);
            let score = match (grievance_lat, grievance_lon, candidate.latitude, candidate.longitude) {
                (Some(glat), Some(glon), Some(dlat), Some(dlon)) => {
                    let geo_km = haversine_km(glat, glon, dlat, dlon);
                    ALPHA * embedding_distance + (1.0 - ALPHA) * (geo_km / GEO_NORMALIZATION_KM)
                }
                _ => embedding_distance,
            };
            DepartmentMatch { department_id: candidate.department_id, name: candidate.name.clone(), combined_score: score }
        })
        .min_by(|a, b| a.combined_score.partial_cmp(&b.combined_score).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: uuid::Uuid, name: &str, embedding: Vec<f32>, lat: f64, lon: f64) -> DepartmentCandidate {
        DepartmentCandidate { department_id: id, name: name.to_string(), jurisdiction: None, embedding, latitude: Some(lat), longitude: Some(lon) }
    }

    #[test]
    fn allocate_prefers_closer_embedding_and_geography() {
        let near = candidate(uuid::Uuid::new_v4(), "Sanitation Zone A", vec![1.0, 0.0], 12.97, 77.59);
        let far = candidate(uuid::Uuid::new_v4(), "Sanitation Zone B", vec![0.0, 1.0], 28.6, 77.2);

        let result = allocate(&[1.0, 0.0], Some(12.97), Some(77.59), &[near, far]).unwrap();
        assert_eq!(result.name, "Sanitation Zone A");
    }

    #[test]
    fn allocate_falls_back_to_embedding_only_without_coordinates() {
        let a = DepartmentCandidate {
            department_id: uuid::Uuid::new_v4(),
            name: "A".to_string(),
            jurisdiction: None,
            embedding: vec![1.0, 0.0],
            latitude: None,
            longitude: None,
        };
        let b = DepartmentCandidate {
            department_id: uuid::Uuid::new_v4(),
            name: "B".to_string(),
            jurisdiction: None,
            embedding: vec![0.0, 1.0],
            latitude: None,
            longitude: None,
        };

        let result = allocate(&[1.0, 0.0], None, None, &[a, b]).unwrap();
        assert_eq!(result.name, "A");
    }

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert!(haversine_km(12.97, 77.59, 12.97, 77.59) < 1e-6);
    }

    #[test]
    fn filters_reject_non_matching_jurisdiction() {
        let candidate = DepartmentCandidate {
            department_id: uuid::Uuid::new_v4(),
            name: "Water Board".to_string(),
            jurisdiction: Some("Zone 3".to_string()),
            embedding: vec![],
            latitude: None,
            longitude: None,
        };
        assert!(matches_filters(&candidate, None, Some("Zone 3")));
        assert!(!matches_filters(&candidate, None, Some("Zone 9")));
    }
}
