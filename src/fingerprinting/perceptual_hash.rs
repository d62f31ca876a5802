use std::{f64::consts::PI, sync::OnceLock};

use ndarray::{s, Array2};

use super::Error;
use crate::definitions::{GRAY_SAMPLE_DIM, GRAY_SAMPLE_LEN, HASH_BLOCK_DIM};

const N: usize = GRAY_SAMPLE_DIM;

static DCT_BASIS: OnceLock<Array2<f64>> = OnceLock::new();

// Orthonormal DCT-II basis. Row k holds alpha(k) * cos(pi * (2n + 1) * k / 2N) for n in 0..N
fn dct_basis() -> &'static Array2<f64> {
    DCT_BASIS.get_or_init(|| {
        let n_f64 = N as f64;
        Array2::from_shape_fn((N, N), |(k, n)| {
            let alpha = if k == 0 {
                (1.0 / n_f64).sqrt()
            } else {
                (2.0 / n_f64).sqrt()
            };
            alpha * (PI * (2.0 * n as f64 + 1.0) * k as f64 / (2.0 * n_f64)).cos()
        })
    })
}

fn check_len(gray: &[u8]) -> Result<(), Error> {
    if gray.len() == GRAY_SAMPLE_LEN {
        Ok(())
    } else {
        Err(Error::InvalidSampleLength {
            expected: GRAY_SAMPLE_LEN,
            actual: gray.len(),
        })
    }
}

/// Two dimensional type-II DCT of a 32x32 gray sample. Element `[u][v]` is the
/// coefficient for vertical frequency `u` and horizontal frequency `v`.
pub fn dct_2d(gray: &[u8]) -> Result<Array2<f64>, Error> {
    check_len(gray)?;

    let pixels = Array2::from_shape_fn((N, N), |(row, col)| f64::from(gray[row * N + col]));
    let basis = dct_basis();

    //transform every row, then every column
    let rows_done = pixels.dot(&basis.t());
    let cols_done = basis.dot(&rows_done);

    Ok(cols_done)
}

/// The 64-bit perceptual hash of a 32x32 gray sample.
///
/// The 8x8 block of DCT coefficients at frequencies 1..=8 on both axes is compared against
/// its own median. Bit `i` (row-major through the block) is set when coefficient `i` is strictly
/// greater than the median. The DC term is left out so the hash ignores overall brightness.
///
/// # Errors
/// [`Error::InvalidSampleLength`] unless the sample is exactly 1024 bytes.
pub fn phash(gray: &[u8]) -> Result<u64, Error> {
    let coeffs = dct_2d(gray)?;

    let block = coeffs.slice(s![1..=HASH_BLOCK_DIM, 1..=HASH_BLOCK_DIM]);
    let values = block.iter().copied().collect::<Vec<_>>();
    let median = median(&values);

    let hash = values
        .iter()
        .enumerate()
        .filter(|(_i, coeff)| **coeff > median)
        .fold(0u64, |acc, (i, _coeff)| acc | (1 << i));

    Ok(hash)
}

// Mean of the two middle values of an even-length slice.
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    (sorted[mid - 1] + sorted[mid]) / 2.0
}

#[cfg(test)]
mod test {
    use rand::prelude::*;
    use rustdct::DctPlanner;

    use super::*;

    fn random_sample(rng: &mut StdRng) -> Vec<u8> {
        (0..GRAY_SAMPLE_LEN).map(|_| rng.gen::<u8>()).collect()
    }

    // Unnormalized row/column DCT from rustdct, scaled to the orthonormal convention.
    fn reference_dct(gray: &[u8]) -> Vec<f64> {
        let scale = |k: usize| {
            if k == 0 {
                (1.0 / N as f64).sqrt()
            } else {
                (2.0 / N as f64).sqrt()
            }
        };

        let mut planner = DctPlanner::new();
        let dct = planner.plan_dct2(N);

        let mut data = gray.iter().map(|x| f64::from(*x)).collect::<Vec<_>>();
        for row in data.chunks_exact_mut(N) {
            dct.process_dct2(row);
            for (k, val) in row.iter_mut().enumerate() {
                *val *= scale(k);
            }
        }

        let mut out = vec![0f64; GRAY_SAMPLE_LEN];
        for col in 0..N {
            let mut column = (0..N).map(|row| data[row * N + col]).collect::<Vec<_>>();
            dct.process_dct2(&mut column);
            for (k, val) in column.iter().enumerate() {
                out[k * N + col] = val * scale(k);
            }
        }
        out
    }

    #[test]
    fn test_dct_matches_reference() {
        let mut rng = StdRng::seed_from_u64(7);
        let gray = random_sample(&mut rng);

        let ours = dct_2d(&gray).unwrap();
        let theirs = reference_dct(&gray);

        for (a, b) in ours.iter().zip(theirs.iter()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn test_dc_term_of_uniform_sample() {
        let coeffs = dct_2d(&[128; GRAY_SAMPLE_LEN]).unwrap();
        // orthonormal: DC = N * mean
        assert!((coeffs[[0, 0]] - 128.0 * N as f64).abs() < 1e-9);
        assert!(coeffs[[1, 1]].abs() < 1e-9);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let gray = random_sample(&mut rng);
            assert_eq!(phash(&gray).unwrap(), phash(&gray).unwrap());
        }

        let uniform = [128u8; GRAY_SAMPLE_LEN];
        assert_eq!(phash(&uniform).unwrap(), phash(&uniform).unwrap());
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        for len in [0, 1023, 1025, 4096] {
            let ret = phash(&vec![0u8; len]);
            assert!(matches!(
                ret,
                Err(Error::InvalidSampleLength { expected: 1024, actual }) if actual == len
            ));
        }
    }

    #[test]
    fn test_inverted_sample_gives_complement() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let gray = random_sample(&mut rng);
            let inverted = gray.iter().map(|x| 255 - x).collect::<Vec<_>>();
            assert_eq!(phash(&inverted).unwrap(), !phash(&gray).unwrap());
        }
    }

    #[test]
    fn test_brightness_shift_does_not_change_hash() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..20 {
            let gray = (0..GRAY_SAMPLE_LEN)
                .map(|_| rng.gen_range(0..200u8))
                .collect::<Vec<_>>();
            let brighter = gray.iter().map(|x| x + 40).collect::<Vec<_>>();
            assert_eq!(phash(&gray).unwrap(), phash(&brighter).unwrap());
        }
    }

    #[test]
    fn test_half_the_bits_are_set() {
        // with 64 distinct coefficients exactly 32 lie above the median.
        let mut rng = StdRng::seed_from_u64(5);
        let gray = random_sample(&mut rng);
        assert_eq!(phash(&gray).unwrap().count_ones(), 32);
    }

    #[test]
    fn test_median_of_even_slice() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }
}
