//! Shamir secret sharing over the Ed25519 scalar field.
//!
//! A secret `s` is the constant term of a random polynomial of degree
//! `threshold - 1`; share `i` (1-based) is `f(i)`. Any `threshold` distinct
//! shares recover `s` by Lagrange interpolation at zero. Fewer shares are
//! rejected outright rather than interpolated into a wrong value.

use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// One evaluation point of the sharing polynomial.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SecretShare {
    /// 1-based share index (the x coordinate).
    pub index: u32,
    /// Canonical little-endian encoding of `f(index)`.
    pub value: [u8; 32],
}

impl std::fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretShare({})", self.index)
    }
}

/// A uniformly random scalar.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    fn random<R: RngCore + CryptoRng>(secret: Scalar, threshold: usize, rng: &mut R) -> Self {
        let mut coefficients = Vec::with_capacity(threshold);
        coefficients.push(secret);
        for _ in 1..threshold {
            coefficients.push(random_scalar(rng));
        }
        Self { coefficients }
    }

    // Horner's method
    fn evaluate(&self, x: Scalar) -> Scalar {
        let mut result = Scalar::ZERO;
        for coeff in self.coefficients.iter().rev() {
            result = result * x + coeff;
        }
        result
    }
}

/// Split `secret` into `count` shares, any `threshold` of which recover it.
pub fn split<R: RngCore + CryptoRng>(
    secret: &Scalar,
    threshold: usize,
    count: usize,
    rng: &mut R,
) -> Result<Vec<SecretShare>> {
    if threshold == 0 || threshold > count {
        return Err(CoreError::InvalidParameter(format!(
            "threshold {} invalid for {} shares",
            threshold, count
        )));
    }
    if u32::try_from(count).is_err() {
        return Err(CoreError::InvalidParameter("too many shares".into()));
    }

    let poly = Polynomial::random(*secret, threshold, rng);
    Ok((1..=count as u32)
        .map(|index| SecretShare {
            index,
            value: poly.evaluate(Scalar::from(index)).to_bytes(),
        })
        .collect())
}

/// Recover the secret from at least `threshold` distinct-index shares.
///
/// Duplicate indices count once. Exactly `threshold` points are used.
pub fn reconstruct(shares: &[SecretShare], threshold: usize) -> Result<Scalar> {
    let points = collect_points(shares, threshold, false)?;
    Ok(interpolate_at_zero(&points[..threshold]))
}

/// Recover a secret that `accept` recognises, trying `threshold`-sized
/// subsets in index order until one is accepted.
///
/// Unlike [`reconstruct`], a non-canonical share is dropped instead of
/// failing the whole call, so one bad replica cannot mask the good ones.
/// At most `max_subsets` subsets are tried; `Ok(None)` means none passed.
pub fn reconstruct_checked<F>(
    shares: &[SecretShare],
    threshold: usize,
    max_subsets: usize,
    accept: F,
) -> Result<Option<Scalar>>
where
    F: Fn(&Scalar) -> bool,
{
    let points = collect_points(shares, threshold, true)?;
    let mut picks: Vec<usize> = (0..threshold).collect();

    for _ in 0..max_subsets {
        let subset: Vec<(Scalar, Scalar)> = picks.iter().map(|&i| points[i]).collect();
        let secret = interpolate_at_zero(&subset);
        if accept(&secret) {
            return Ok(Some(secret));
        }
        if !next_combination(&mut picks, points.len()) {
            break;
        }
    }
    Ok(None)
}

/// Distinct-index points in index order, at least `threshold` of them.
fn collect_points(
    shares: &[SecretShare],
    threshold: usize,
    skip_invalid: bool,
) -> Result<Vec<(Scalar, Scalar)>> {
    if threshold == 0 {
        return Err(CoreError::InvalidParameter("threshold must be positive".into()));
    }

    let mut points: BTreeMap<u32, Scalar> = BTreeMap::new();
    for share in shares {
        if share.index == 0 {
            return Err(CoreError::InvalidShare(0));
        }
        if points.contains_key(&share.index) {
            continue;
        }
        match Option::<Scalar>::from(Scalar::from_canonical_bytes(share.value)) {
            Some(y) => {
                points.insert(share.index, y);
            }
            None if skip_invalid => continue,
            None => return Err(CoreError::InvalidShare(share.index)),
        }
    }

    if points.len() < threshold {
        return Err(CoreError::InsufficientShares {
            have: points.len(),
            need: threshold,
        });
    }

    Ok(points
        .into_iter()
        .map(|(x, y)| (Scalar::from(x), y))
        .collect())
}

/// Advance `picks` to the next ascending combination of `0..n`.
fn next_combination(picks: &mut [usize], n: usize) -> bool {
    let k = picks.len();
    for i in (0..k).rev() {
        if picks[i] < n - k + i {
            picks[i] += 1;
            for j in i + 1..k {
                picks[j] = picks[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

fn interpolate_at_zero(points: &[(Scalar, Scalar)]) -> Scalar {
    let mut result = Scalar::ZERO;
    for (i, (xi, yi)) in points.iter().enumerate() {
        let mut basis = Scalar::ONE;
        for (j, (xj, _)) in points.iter().enumerate() {
            if i != j {
                // L_i(0) *= -x_j / (x_i - x_j)
                basis *= -xj * (xi - xj).invert();
            }
        }
        result += yi * basis;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_split_reconstruct() {
        let mut rng = rng();
        let secret = random_scalar(&mut rng);
        let shares = split(&secret, 3, 7, &mut rng).unwrap();
        assert_eq!(shares.len(), 7);
        assert_eq!(shares[0].index, 1);
        assert_eq!(shares[6].index, 7);

        assert_eq!(reconstruct(&shares, 3).unwrap(), secret);
        assert_eq!(reconstruct(&shares[4..], 3).unwrap(), secret);
    }

    #[test]
    fn test_insufficient_shares() {
        let mut rng = rng();
        let secret = random_scalar(&mut rng);
        let shares = split(&secret, 4, 7, &mut rng).unwrap();

        let err = reconstruct(&shares[..3], 4).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientShares { have: 3, need: 4 }));
    }

    #[test]
    fn test_duplicate_indices_count_once() {
        let mut rng = rng();
        let secret = random_scalar(&mut rng);
        let shares = split(&secret, 3, 5, &mut rng).unwrap();
        let dupes = vec![shares[0], shares[0], shares[1], shares[1]];

        let err = reconstruct(&dupes, 3).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientShares { have: 2, need: 3 }));
    }

    #[test]
    fn test_non_canonical_share_rejected() {
        let share = SecretShare {
            index: 1,
            value: [0xff; 32],
        };
        assert!(matches!(
            reconstruct(&[share], 1),
            Err(CoreError::InvalidShare(1))
        ));
    }

    #[test]
    fn test_checked_reconstruct_skips_bad_share() {
        let mut rng = rng();
        let secret = random_scalar(&mut rng);
        let mut shares = split(&secret, 3, 5, &mut rng).unwrap();
        // A well-formed value from a different polynomial.
        shares[0].value = random_scalar(&mut rng).to_bytes();
        shares[2].value = [0xff; 32];

        assert!(matches!(reconstruct(&shares, 3), Err(CoreError::InvalidShare(3))));
        let found = reconstruct_checked(&shares, 3, 64, |s| *s == secret).unwrap();
        assert_eq!(found, Some(secret));
    }

    #[test]
    fn test_checked_reconstruct_gives_up() {
        let mut rng = rng();
        let secret = random_scalar(&mut rng);
        let shares = split(&secret, 2, 4, &mut rng).unwrap();

        assert_eq!(reconstruct_checked(&shares, 2, 64, |_| false).unwrap(), None);
        let err = reconstruct_checked(&shares[..1], 2, 64, |_| true).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientShares { have: 1, need: 2 }));
    }

    #[test]
    fn test_next_combination_visits_every_subset() {
        let mut picks = vec![0, 1];
        let mut seen = vec![picks.clone()];
        while next_combination(&mut picks, 4) {
            seen.push(picks.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3],
            ]
        );
    }

    #[test]
    fn test_split_parameter_validation() {
        let mut rng = rng();
        let secret = random_scalar(&mut rng);
        assert!(split(&secret, 0, 3, &mut rng).is_err());
        assert!(split(&secret, 4, 3, &mut rng).is_err());
        assert!(split(&secret, 3, 3, &mut rng).is_ok());
    }

    #[test]
    fn test_threshold_one_shares_equal_secret() {
        let mut rng = rng();
        let secret = random_scalar(&mut rng);
        let shares = split(&secret, 1, 3, &mut rng).unwrap();
        for share in &shares {
            assert_eq!(share.value, secret.to_bytes());
        }
    }

    proptest! {
        #[test]
        fn any_threshold_subset_recovers(
            seed in any::<u64>(),
            threshold in 1usize..6,
            extra in 0usize..4,
            pick in any::<prop::sample::Index>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let count = threshold + extra;
            let secret = random_scalar(&mut rng);
            let shares = split(&secret, threshold, count, &mut rng).unwrap();

            // Rotate the share list and take a window of `threshold`.
            let offset = pick.index(count);
            let subset: Vec<_> = shares
                .iter()
                .cycle()
                .skip(offset)
                .take(threshold)
                .copied()
                .collect();
            prop_assert_eq!(reconstruct(&subset, threshold).unwrap(), secret);
        }
    }
}
