//! Canvas containment test used to decide cluster promotion.

use crate::models::{Cluster, Position, Size};

/// Whether `point` lies inside the rectangle at `origin` with `size`.
///
/// All four edges are inclusive.
pub fn contains(origin: Position, size: Size, point: Position) -> bool {
    point.x >= origin.x
        && point.x <= origin.x + size.width
        && point.y >= origin.y
        && point.y <= origin.y + size.height
}

impl Cluster {
    pub fn contains(&self, point: Position) -> bool {
        contains(self.position, self.size, point)
    }
}

/// First cluster (in slice order) whose rectangle contains `point`.
pub fn find_containing_cluster(clusters: &[Cluster], point: Position) -> Option<&Cluster> {
    clusters.iter().find(|c| c.contains(point))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn cluster_at(x: f64, y: f64, w: f64, h: f64) -> Cluster {
        Cluster {
            id: Uuid::now_v7(),
            org_id: Uuid::nil(),
            study_id: None,
            name: "c".into(),
            color: "#FDE68A".into(),
            position: Position::new(x, y),
            size: Size::new(w, h),
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            items: vec![],
        }
    }

    #[test]
    fn test_interior_point_contained() {
        let origin = Position::new(100.0, 100.0);
        let size = Size::new(200.0, 200.0);
        assert!(contains(origin, size, Position::new(150.0, 150.0)));
    }

    #[test]
    fn test_edges_inclusive() {
        let origin = Position::new(100.0, 100.0);
        let size = Size::new(200.0, 200.0);
        assert!(contains(origin, size, Position::new(100.0, 100.0)));
        assert!(contains(origin, size, Position::new(300.0, 300.0)));
        assert!(contains(origin, size, Position::new(100.0, 300.0)));
        assert!(contains(origin, size, Position::new(300.0, 100.0)));
    }

    #[test]
    fn test_outside_points_rejected() {
        let origin = Position::new(100.0, 100.0);
        let size = Size::new(200.0, 200.0);
        assert!(!contains(origin, size, Position::new(99.999, 150.0)));
        assert!(!contains(origin, size, Position::new(150.0, 300.001)));
        assert!(!contains(origin, size, Position::new(-150.0, -150.0)));
    }

    #[test]
    fn test_find_containing_cluster_first_match() {
        let clusters = vec![
            cluster_at(0.0, 0.0, 50.0, 50.0),
            cluster_at(100.0, 100.0, 200.0, 200.0),
            cluster_at(120.0, 120.0, 40.0, 40.0),
        ];
        let hit = find_containing_cluster(&clusters, Position::new(130.0, 130.0)).unwrap();
        assert_eq!(hit.id, clusters[1].id);
        assert!(find_containing_cluster(&clusters, Position::new(75.0, 75.0)).is_none());
    }
}
