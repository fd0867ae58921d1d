//! Arbitrary-precision combinatorics.
//!
//! Ranking and unranking of weak compositions and permutations, the two
//! bijections behind the budget-split and budget-claim channels. All
//! arithmetic is exact over `BigUint`; capacity computations never touch
//! floating point.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

/// Computes `n!`.
pub fn factorial(n: u64) -> BigUint {
    let mut fac = BigUint::one();
    for i in 2..=n {
        fac *= i;
    }
    fac
}

/// Computes the binomial coefficient `C(n, k)`.
///
/// Uses the multiplicative recurrence with `k <- min(k, n - k)`; every
/// intermediate division is exact.
pub fn binomial(n: u64, k: u64) -> BigUint {
    if k > n {
        return BigUint::zero();
    }

    let k = k.min(n - k);
    let mut result = BigUint::one();
    for i in 1..=k {
        result *= n - k + i;
        result /= i;
    }
    result
}

/// Counts the weak compositions of `n` into `k` ordered non-negative parts:
/// `C(n + k - 1, k - 1)`.
pub fn number_of_compositions(n: u64, k: u16) -> BigUint {
    binomial(n + u64::from(k) - 1, u64::from(k) - 1)
}

/// Computes the lexicographic rank of a permutation of `{0, .., k-1}` via its
/// Lehmer code.
pub fn permutation_to_int(perm: &[u16]) -> BigUint {
    let k = perm.len();
    let mut idx = BigUint::zero();

    for i in 0..k - 1 {
        let a = perm[i + 1..].iter().filter(|&&p| p < perm[i]).count();
        idx += a * factorial((k - i - 1) as u64);
    }

    idx
}

/// Recovers the permutation of `{0, .., k-1}` with lexicographic rank `idx`.
pub fn int_to_permutation(mut idx: BigUint, k: u16) -> Vec<u16> {
    let k = usize::from(k);
    let mut buf: Vec<u16> = (0..k as u16).collect();
    let mut perm = Vec::with_capacity(k);

    for i in 0..k {
        let fac = factorial((k - i - 1) as u64);
        let x = (&idx / &fac)
            .to_usize()
            .expect("rank exceeds k! for the residual elements");
        idx -= &fac * x;
        perm.push(buf.remove(x));
    }

    perm
}

/// Computes the lexicographic rank of a weak composition.
pub fn composition_to_int(composition: &[u64]) -> BigUint {
    let mut n: u64 = composition.iter().sum();
    let mut k = composition.len() as u16;
    let mut idx = BigUint::zero();

    for &part in &composition[..composition.len() - 1] {
        idx += number_of_compositions(n, k) - number_of_compositions(n - part, k);
        k -= 1;
        n -= part;
    }

    idx
}

/// Recovers the weak composition of `n` into `k` parts with rank `idx`.
pub fn int_to_composition(mut idx: BigUint, mut n: u64, k: u16) -> Vec<u64> {
    let parts = usize::from(k);
    let mut composition = vec![0u64; parts];
    let mut k = k;

    for slot in composition.iter_mut().take(parts - 1) {
        if n == 0 {
            break;
        }

        let mu = largest_pivot(&idx, n, k);
        idx -= number_of_compositions(n, k) - number_of_compositions(n - mu, k);
        n -= mu;
        k -= 1;
        *slot = mu;
    }

    composition[parts - 1] = n;
    composition
}

/// Largest `mu` in `[0, n]` with
/// `number_of_compositions(n, k) - number_of_compositions(n - mu, k) <= idx`.
///
/// The left side is nondecreasing in `mu` and zero at `mu = 0`, so a plain
/// binary search replaces the floating-point bootstrap of the reference
/// formulation.
fn largest_pivot(idx: &BigUint, n: u64, k: u16) -> u64 {
    let total = number_of_compositions(n, k);
    let (mut lo, mut hi) = (0u64, n);

    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if &total - number_of_compositions(n - mid, k) <= *idx {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn factorial_known_values() {
        assert_eq!(factorial(15), "1307674368000".parse().unwrap());
        assert_eq!(factorial(20), BigUint::from(2_432_902_008_176_640_000u64));
    }

    #[test]
    fn binomial_known_values() {
        let expected: BigUint = "2743355077591282538231819720749000".parse().unwrap();
        assert_eq!(binomial(10_000, 10), expected);

        let expected: BigUint = concat!(
            "4110309813715592060664607462520467",
            "3661181482104821558334324522322245",
            "3961686492150576818256239849895780",
            "8721334755964733592404450443749995",
            "000000"
        )
        .parse()
        .unwrap();
        assert_eq!(binomial(100_000_000, 20), expected);
    }

    #[test]
    fn binomial_degenerate_cases() {
        assert_eq!(binomial(5, 7), BigUint::zero());
        assert_eq!(binomial(7, 0), BigUint::one());
        assert_eq!(binomial(7, 7), BigUint::one());
    }

    #[test]
    fn composition_count_known_values() {
        assert_eq!(number_of_compositions(4, 3), BigUint::from(15u8));

        let expected: BigUint = concat!(
            "82221973055587378044140706739446352",
            "15122022458298030777261095087856400",
            "805804158672921856713387501"
        )
        .parse()
        .unwrap();
        assert_eq!(number_of_compositions(1_000_000, 20), expected);
    }

    #[test]
    fn permutation_rank_known_values() {
        assert_eq!(permutation_to_int(&[3, 2, 1, 0]), BigUint::from(23u8));
        assert_eq!(
            permutation_to_int(&[2, 7, 8, 3, 9, 1, 5, 6, 0, 4]),
            BigUint::from(1_000_000u32)
        );
    }

    #[test]
    fn permutation_unrank_known_values() {
        assert_eq!(int_to_permutation(BigUint::from(23u8), 4), vec![3, 2, 1, 0]);
        assert_eq!(
            int_to_permutation(BigUint::from(1_000_000u32), 10),
            vec![2, 7, 8, 3, 9, 1, 5, 6, 0, 4]
        );
    }

    #[test]
    fn composition_round_trip_small() {
        let c = vec![0u64, 3, 1, 0, 2];
        let idx = composition_to_int(&c);
        assert_eq!(int_to_composition(idx, 6, 5), c);
    }

    proptest! {
        #[test]
        fn permutation_round_trips(k in 2u16..20, seed in any::<u64>()) {
            // A rank below k! always unranks back to itself.
            let idx = BigUint::from(seed) % factorial(u64::from(k));
            let perm = int_to_permutation(idx.clone(), k);
            prop_assert_eq!(permutation_to_int(&perm), idx);
        }

        #[test]
        fn composition_round_trips(
            parts in proptest::collection::vec(0u64..5_000, 2..12)
        ) {
            let n: u64 = parts.iter().sum();
            let k = parts.len() as u16;
            let idx = composition_to_int(&parts);
            prop_assert_eq!(int_to_composition(idx, n, k), parts);
        }

        #[test]
        fn composition_rank_in_range(
            parts in proptest::collection::vec(0u64..1_000, 2..10)
        ) {
            let n: u64 = parts.iter().sum();
            let k = parts.len() as u16;
            prop_assert!(composition_to_int(&parts) < number_of_compositions(n, k));
        }
    }
}
