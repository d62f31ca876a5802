/// Decides whether a gray sample carries too little tonal information to be hashed usefully.
///
/// Returns true when the sample is "too dark" (e.g. a fade to black).
pub trait VarianceCheck: Send + Sync {
    fn is_too_dark(&self, gray: &[u8]) -> bool;
}

impl<F> VarianceCheck for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn is_too_dark(&self, gray: &[u8]) -> bool {
        self(gray)
    }
}

/// A sample is too dark when it is both dim and flat: mean luma below `max_dark_mean` and
/// standard deviation below `min_std_dev`. A dim frame with visible detail still hashes fine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonalVarianceCheck {
    pub max_dark_mean: f64,
    pub min_std_dev: f64,
}

impl Default for TonalVarianceCheck {
    fn default() -> Self {
        Self {
            max_dark_mean: 24.0,
            min_std_dev: 6.0,
        }
    }
}

impl TonalVarianceCheck {
    /// Mean and population standard deviation on the 0..255 scale.
    pub fn stats(gray: &[u8]) -> (f64, f64) {
        if gray.is_empty() {
            return (0.0, 0.0);
        }

        let n = gray.len() as f64;
        let mean = gray.iter().map(|x| f64::from(*x)).sum::<f64>() / n;
        let variance = gray
            .iter()
            .map(|x| (f64::from(*x) - mean).powi(2))
            .sum::<f64>()
            / n;

        (mean, variance.sqrt())
    }
}

impl VarianceCheck for TonalVarianceCheck {
    fn is_too_dark(&self, gray: &[u8]) -> bool {
        let (mean, std_dev) = Self::stats(gray);
        mean < self.max_dark_mean && std_dev < self.min_std_dev
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::GRAY_SAMPLE_LEN;

    #[test]
    fn test_black_frame_is_dark() {
        let check = TonalVarianceCheck::default();
        assert!(check.is_too_dark(&[0; GRAY_SAMPLE_LEN]));
        assert!(check.is_too_dark(&[16; GRAY_SAMPLE_LEN]));
        assert!(!check.is_too_dark(&[128; GRAY_SAMPLE_LEN]));
    }

    #[test]
    fn test_dim_frame_with_detail_is_not_dark() {
        // alternating 0 / 40: mean 20, std dev 20
        let gray = (0..GRAY_SAMPLE_LEN)
            .map(|i| if i % 2 == 0 { 0 } else { 40 })
            .collect::<Vec<u8>>();
        let (mean, std_dev) = TonalVarianceCheck::stats(&gray);
        assert_eq!(mean, 20.0);
        assert_eq!(std_dev, 20.0);
        assert!(!TonalVarianceCheck::default().is_too_dark(&gray));
    }

    #[test]
    fn test_closure_as_check() {
        let never = |_: &[u8]| false;
        assert!(!never.is_too_dark(&[0; GRAY_SAMPLE_LEN]));
    }
}
