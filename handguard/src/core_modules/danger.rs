// THEORY:
// The danger rule is a single geometric predicate: a hazard detection (an
// ungloved hand) is dangerous when its box lies *entirely* inside a danger zone.
// Overlap is not enough; a hand reaching past the edge of a zone is not in it.
//
// `evaluate` is pure and deterministic. It holds no state and performs no I/O, so
// it is tested exhaustively here and trusted everywhere else.
//
// Policy details:
// 1.  Only detections carrying the hazard class are considered.
// 2.  Zones are scanned in order and the first containing zone is recorded for a
//     box (first-match); a box is never attributed to several zones.
// 3.  Boundaries are inclusive: a box equal to its zone counts as contained.

use crate::core_modules::region::Region;
use crate::detector::{BoundingBox, DetectionBox};
use std::collections::BTreeSet;

/// The verdict for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assessment {
    pub is_dangerous: bool,
    /// Indices (into the zone list) of every zone that contained a hazard box.
    pub implicated_regions: BTreeSet<usize>,
    /// Hazard boxes that matched a zone, in detection order.
    pub danger_boxes: Vec<DetectionBox>,
    /// Every hazard-class detection, dangerous or not.
    pub hazard_boxes: Vec<DetectionBox>,
}

impl Assessment {
    /// An assessment that records hazards for display without judging them.
    pub fn unevaluated(detections: &[DetectionBox], hazard_class: &str) -> Self {
        Self {
            hazard_boxes: hazards(detections, hazard_class).cloned().collect(),
            ..Self::default()
        }
    }
}

/// Whether `bbox` lies fully inside `region`, edges inclusive.
pub fn contains(region: &Region, bbox: &BoundingBox) -> bool {
    region.xmin as f32 <= bbox.xmin
        && region.ymin as f32 <= bbox.ymin
        && bbox.xmax <= region.xmax as f32
        && bbox.ymax <= region.ymax as f32
}

/// Judges one frame's detections against the zones of its view.
pub fn evaluate(detections: &[DetectionBox], regions: &[Region], hazard_class: &str) -> Assessment {
    let mut assessment = Assessment::default();

    for detection in hazards(detections, hazard_class) {
        assessment.hazard_boxes.push(detection.clone());

        if let Some(index) = regions.iter().position(|r| contains(r, &detection.bbox)) {
            assessment.implicated_regions.insert(index);
            assessment.danger_boxes.push(detection.clone());
        }
    }

    assessment.is_dangerous = !assessment.danger_boxes.is_empty();
    assessment
}

fn hazards<'a>(
    detections: &'a [DetectionBox],
    hazard_class: &'a str,
) -> impl Iterator<Item = &'a DetectionBox> + 'a {
    detections.iter().filter(move |d| d.label == hazard_class)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAZARD: &str = "bare";

    fn hand(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> DetectionBox {
        DetectionBox::new(BoundingBox::new(xmin, ymin, xmax, ymax), HAZARD, 0.9)
    }

    fn glove(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> DetectionBox {
        DetectionBox::new(BoundingBox::new(xmin, ymin, xmax, ymax), "glove", 0.9)
    }

    #[test]
    fn box_equal_to_region_is_contained() {
        let zone = Region::new(10, 10, 50, 50);
        assert!(contains(&zone, &BoundingBox::new(10.0, 10.0, 50.0, 50.0)));
    }

    #[test]
    fn exceeding_any_edge_by_one_is_not_contained() {
        let zone = Region::new(10, 10, 50, 50);
        assert!(!contains(&zone, &BoundingBox::new(9.0, 10.0, 50.0, 50.0)));
        assert!(!contains(&zone, &BoundingBox::new(10.0, 9.0, 50.0, 50.0)));
        assert!(!contains(&zone, &BoundingBox::new(10.0, 10.0, 51.0, 50.0)));
        assert!(!contains(&zone, &BoundingBox::new(10.0, 10.0, 50.0, 51.0)));
    }

    #[test]
    fn containment_matches_edge_predicate_over_a_grid() {
        let zone = Region::new(2, 3, 7, 8);
        for xmin in 0..10 {
            for ymin in 0..10 {
                for size in 0..6 {
                    let (xmax, ymax) = (xmin + size, ymin + size);
                    let bbox = BoundingBox::new(xmin as f32, ymin as f32, xmax as f32, ymax as f32);
                    let expected = xmin >= zone.xmin
                        && ymin >= zone.ymin
                        && xmax <= zone.xmax
                        && ymax <= zone.ymax;
                    assert_eq!(contains(&zone, &bbox), expected, "{bbox:?}");
                }
            }
        }
    }

    #[test]
    fn overlap_alone_is_not_dangerous() {
        let zones = [Region::new(0, 0, 100, 100)];
        let result = evaluate(&[hand(90.0, 90.0, 110.0, 110.0)], &zones, HAZARD);
        assert!(!result.is_dangerous);
        assert!(result.implicated_regions.is_empty());
        assert_eq!(result.hazard_boxes.len(), 1);
    }

    #[test]
    fn fractional_boxes_compare_against_integer_edges() {
        let zones = [Region::new(0, 0, 100, 100)];
        assert!(evaluate(&[hand(0.0, 0.0, 99.9, 100.0)], &zones, HAZARD).is_dangerous);
        assert!(!evaluate(&[hand(0.0, 0.0, 100.1, 100.0)], &zones, HAZARD).is_dangerous);
    }

    #[test]
    fn other_classes_are_ignored() {
        let zones = [Region::new(0, 0, 100, 100)];
        let result = evaluate(&[glove(10.0, 10.0, 20.0, 20.0)], &zones, HAZARD);
        assert!(!result.is_dangerous);
        assert!(result.hazard_boxes.is_empty());
    }

    #[test]
    fn first_containing_region_wins() {
        let zones = [
            Region::new(500, 500, 600, 600),
            Region::new(0, 0, 100, 100),
            Region::new(0, 0, 200, 200),
        ];
        let result = evaluate(&[hand(10.0, 10.0, 20.0, 20.0)], &zones, HAZARD);
        assert!(result.is_dangerous);
        assert_eq!(result.implicated_regions, BTreeSet::from([1]));
        assert_eq!(result.danger_boxes.len(), 1);
    }

    #[test]
    fn each_box_is_attributed_independently() {
        let zones = [Region::new(0, 0, 100, 100), Region::new(200, 0, 300, 100)];
        let detections = [
            hand(10.0, 10.0, 20.0, 20.0),
            glove(210.0, 10.0, 220.0, 20.0),
            hand(210.0, 10.0, 220.0, 20.0),
            hand(150.0, 10.0, 160.0, 20.0),
        ];
        let result = evaluate(&detections, &zones, HAZARD);
        assert!(result.is_dangerous);
        assert_eq!(result.implicated_regions, BTreeSet::from([0, 1]));
        assert_eq!(result.danger_boxes, vec![detections[0].clone(), detections[2].clone()]);
        assert_eq!(result.hazard_boxes.len(), 3);
    }

    #[test]
    fn no_regions_means_no_danger() {
        let result = evaluate(&[hand(10.0, 10.0, 20.0, 20.0)], &[], HAZARD);
        assert!(!result.is_dangerous);
    }

    #[test]
    fn no_detections_means_no_danger() {
        let result = evaluate(&[], &[Region::new(0, 0, 10, 10)], HAZARD);
        assert_eq!(result, Assessment::default());
    }

    #[test]
    fn rescaled_zone_contains_hand() {
        let zone = Region::new(0, 0, 100, 100).rescale((100, 100), (200, 200));
        assert_eq!(zone, Region::new(0, 0, 199, 199));
        assert!(evaluate(&[hand(10.0, 10.0, 50.0, 50.0)], &[zone], HAZARD).is_dangerous);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let zones = [Region::new(0, 0, 100, 100)];
        let detections = [hand(10.0, 10.0, 20.0, 20.0), hand(95.0, 95.0, 105.0, 105.0)];
        assert_eq!(
            evaluate(&detections, &zones, HAZARD),
            evaluate(&detections, &zones, HAZARD)
        );
    }

    #[test]
    fn unevaluated_keeps_hazards_only() {
        let detections = [hand(10.0, 10.0, 20.0, 20.0), glove(0.0, 0.0, 1.0, 1.0)];
        let result = Assessment::unevaluated(&detections, HAZARD);
        assert!(!result.is_dangerous);
        assert_eq!(result.hazard_boxes.len(), 1);
        assert!(result.danger_boxes.is_empty());
    }
}
