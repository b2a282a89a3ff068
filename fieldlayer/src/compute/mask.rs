//! Validity and cloud masking.

use crate::provider::Imagery;

/// Per-pixel validity after masking.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidityMask {
    valid: Vec<bool>,
    valid_count: usize,
}

impl ValidityMask {
    /// Masks out pixels without data, with reflectance outside [0, 1], or
    /// with cloud probability at or above `cloud_threshold`.
    pub fn build(imagery: &Imagery, cloud_threshold: f32) -> Self {
        let in_range = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        let valid: Vec<bool> = imagery
            .red
            .iter()
            .zip(&imagery.nir)
            .zip(&imagery.cloud)
            .map(|((&r, &n), &c)| in_range(r) && in_range(n) && c.is_finite() && c < cloud_threshold)
            .collect();
        let valid_count = valid.iter().filter(|v| **v).count();
        Self { valid, valid_count }
    }

    pub fn is_valid(&self, i: usize) -> bool {
        self.valid.get(i).copied().unwrap_or(false)
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn len(&self) -> usize {
        self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    /// Share of valid pixels in [0, 1].
    pub fn valid_fraction(&self) -> f64 {
        if self.valid.is_empty() {
            0.0
        } else {
            self.valid_count as f64 / self.valid.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::BoundingBox;
    use chrono::NaiveDate;

    fn imagery(red: Vec<f32>, nir: Vec<f32>, cloud: Vec<f32>) -> Imagery {
        Imagery {
            width: red.len() as u32,
            height: 1,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            acquired_on: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            red,
            nir,
            cloud,
            cloud_cover_pct: 0.0,
            source: "test".into(),
        }
    }

    #[test]
    fn test_mask_rules() {
        let img = imagery(
            vec![0.1, f32::NAN, 0.1, 1.2, 0.1],
            vec![0.5, 0.5, 0.5, 0.5, 0.5],
            vec![0.0, 0.0, 0.4, 0.0, 0.39],
        );
        let mask = ValidityMask::build(&img, 0.4);

        assert!(mask.is_valid(0));
        assert!(!mask.is_valid(1), "no data");
        assert!(!mask.is_valid(2), "cloud at threshold");
        assert!(!mask.is_valid(3), "reflectance out of range");
        assert!(mask.is_valid(4));
        assert!(!mask.is_valid(99));
        assert_eq!(mask.valid_count(), 2);
        assert!((mask.valid_fraction() - 0.4).abs() < 1e-12);
    }
}
