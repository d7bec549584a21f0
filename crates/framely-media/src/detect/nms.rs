//! Cross-pass non-maximum suppression.

use framely_models::ObjectBox;

/// Suppress overlapping detections across passes.
///
/// Candidates are ranked by confidence, ties broken by the earliest pass
/// (coarse before tiled before fine). A candidate is dropped when its IoU
/// with an already kept box reaches `iou_threshold`.
pub fn cross_pass_nms(mut candidates: Vec<ObjectBox>, iou_threshold: f64) -> Vec<ObjectBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.pass.cmp(&b.pass))
    });

    let mut kept: Vec<ObjectBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| k.bbox.iou(&candidate.bbox) >= iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use framely_models::{BoundingBox, DetectionPass};

    fn obj(x: u32, conf: f32, pass: DetectionPass) -> ObjectBox {
        ObjectBox {
            bbox: BoundingBox::new(x, 0, 100, 100),
            class: "object".into(),
            confidence: conf,
            pass,
        }
    }

    #[test]
    fn overlapping_lower_confidence_is_suppressed() {
        let kept = cross_pass_nms(
            vec![obj(0, 0.9, DetectionPass::Coarse), obj(10, 0.5, DetectionPass::Tiled)],
            0.5,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn disjoint_boxes_all_survive() {
        let kept = cross_pass_nms(
            vec![obj(0, 0.9, DetectionPass::Coarse), obj(500, 0.5, DetectionPass::Fine)],
            0.5,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn tie_breaks_to_earliest_pass() {
        let kept = cross_pass_nms(
            vec![obj(5, 0.7, DetectionPass::Fine), obj(0, 0.7, DetectionPass::Coarse)],
            0.5,
        );
        assert_eq!(kept[0].pass, DetectionPass::Coarse);
    }
}
