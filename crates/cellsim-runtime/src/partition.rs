//! Shared-resource partitioner.
//!
//! Resolves the signed claims that several processes (or several agents)
//! place on one finite pool in the same tick:
//!
//! - producers (delta ≥ 0) are granted in full and add to what is available
//! - if consumer demand fits, every consumer is granted in full
//! - otherwise consumers are rationed proportionally so that the grants sum
//!   to exactly the available amount
//!
//! Integer pools apportion by largest remainder; ties go to the larger
//! request, then to the earlier claim. Real pools scale proportionally.
//! Every allotment is verified before it is returned.

use cellsim_core::value::PoolKind;
use thiserror::Error;

/// Slack allowed on real pools for floating-point rounding.
pub const REAL_TOLERANCE: f64 = 1e-9;

/// One signed claim on a pool. `order` is the stable tie-break rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolClaim {
    pub order: usize,
    pub delta: f64,
}

/// Grants for one pool, aligned with the claims they answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Allotment {
    pub grants: Vec<f64>,
    /// Current value plus all production.
    pub available: f64,
    /// Total requested consumption, as a positive amount.
    pub demand: f64,
    /// Whether consumers were scaled down.
    pub rationed: bool,
}

impl Allotment {
    /// Total granted consumption, as a positive amount.
    pub fn consumed(&self) -> f64 {
        self.grants.iter().filter(|g| **g < 0.0).map(|g| -g).sum()
    }

    /// Pool value once every grant is applied.
    pub fn remaining(&self) -> f64 {
        self.available - self.consumed()
    }
}

/// The partitioner produced, or was asked to work from, an impossible state.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct PartitionFault(pub String);

/// Partition `claims` against a pool currently holding `current`.
pub fn allot(kind: PoolKind, current: f64, claims: &[PoolClaim]) -> Result<Allotment, PartitionFault> {
    if !current.is_finite() || current < 0.0 {
        return Err(PartitionFault(format!("pool holds {} before partitioning", current)));
    }
    if let Some(bad) = claims.iter().find(|c| !c.delta.is_finite()) {
        return Err(PartitionFault(format!("claim {} is not finite", bad.delta)));
    }

    let allotment = match kind {
        PoolKind::Integer => allot_integer(current, claims)?,
        PoolKind::Real => allot_real(current, claims),
    };
    verify(kind, claims, &allotment)?;
    Ok(allotment)
}

fn allot_integer(current: f64, claims: &[PoolClaim]) -> Result<Allotment, PartitionFault> {
    let integral = |x: f64| x.fract() == 0.0 && x.abs() < 2f64.powi(62);
    if !integral(current) {
        return Err(PartitionFault(format!("integer pool holds {}", current)));
    }
    if let Some(bad) = claims.iter().find(|c| !integral(c.delta)) {
        return Err(PartitionFault(format!("integer claim {} is not integral", bad.delta)));
    }

    let produced: u128 = claims
        .iter()
        .filter(|c| c.delta >= 0.0)
        .map(|c| c.delta as u128)
        .sum();
    let available = current as u128 + produced;

    let consumers: Vec<(usize, u128)> = claims
        .iter()
        .enumerate()
        .filter(|(_, c)| c.delta < 0.0)
        .map(|(i, c)| (i, (-c.delta) as u128))
        .collect();
    let demand: u128 = consumers.iter().map(|(_, r)| r).sum();

    let mut grants: Vec<f64> = claims.iter().map(|c| c.delta).collect();
    let rationed = demand > available;

    if rationed {
        let mut shares: Vec<(usize, u128, u128, u128)> = consumers
            .iter()
            .map(|&(i, request)| {
                let scaled = available * request;
                (i, request, scaled / demand, scaled % demand)
            })
            .collect();

        let floors: u128 = shares.iter().map(|s| s.2).sum();
        let mut leftover = available - floors;

        // Largest remainder first, then larger request, then earlier claim.
        let mut ranking: Vec<usize> = (0..shares.len()).collect();
        ranking.sort_by(|&a, &b| {
            let (ia, ra, _, rema) = shares[a];
            let (ib, rb, _, remb) = shares[b];
            remb.cmp(&rema)
                .then(rb.cmp(&ra))
                .then(claims[ia].order.cmp(&claims[ib].order))
        });
        for pick in ranking {
            if leftover == 0 {
                break;
            }
            shares[pick].2 += 1;
            leftover -= 1;
        }

        for (i, _, granted, _) in shares {
            grants[i] = -(granted as f64);
        }
    }

    Ok(Allotment {
        grants,
        available: available as f64,
        demand: demand as f64,
        rationed,
    })
}

fn allot_real(current: f64, claims: &[PoolClaim]) -> Allotment {
    let produced: f64 = claims.iter().filter(|c| c.delta >= 0.0).map(|c| c.delta).sum();
    let available = current + produced;
    let demand: f64 = claims.iter().filter(|c| c.delta < 0.0).map(|c| -c.delta).sum();

    let mut grants: Vec<f64> = claims.iter().map(|c| c.delta).collect();
    let rationed = demand > available;

    if rationed {
        let scale = available / demand;
        let mut largest: Option<usize> = None;
        for (i, claim) in claims.iter().enumerate() {
            if claim.delta < 0.0 {
                grants[i] = claim.delta * scale;
                if largest.map_or(true, |j| grants[i] < grants[j]) {
                    largest = Some(i);
                }
            }
        }
        // Rounding can leave the sum a few ulps over availability.
        let consumed: f64 = grants.iter().filter(|g| **g < 0.0).map(|g| -g).sum();
        if let (Some(j), true) = (largest, consumed > available) {
            grants[j] = (grants[j] + (consumed - available)).min(0.0);
        }
    }

    Allotment {
        grants,
        available,
        demand,
        rationed,
    }
}

fn verify(kind: PoolKind, claims: &[PoolClaim], allotment: &Allotment) -> Result<(), PartitionFault> {
    let slack = match kind {
        PoolKind::Integer => 0.0,
        PoolKind::Real => REAL_TOLERANCE * allotment.available.abs().max(1.0),
    };

    for (claim, granted) in claims.iter().zip(&allotment.grants) {
        if granted.abs() > claim.delta.abs() + slack {
            return Err(PartitionFault(format!(
                "grant {} exceeds request {}",
                granted, claim.delta
            )));
        }
        if *granted != 0.0 && granted.signum() != claim.delta.signum() {
            return Err(PartitionFault(format!(
                "grant {} flips the sign of request {}",
                granted, claim.delta
            )));
        }
    }

    let consumed = allotment.consumed();
    if consumed > allotment.available + slack {
        return Err(PartitionFault(format!(
            "granted consumption {} exceeds availability {}",
            consumed, allotment.available
        )));
    }
    if allotment.rationed && (allotment.available - consumed).abs() > slack {
        return Err(PartitionFault(format!(
            "rationed grants sum to {} instead of availability {}",
            consumed, allotment.available
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(deltas: &[f64]) -> Vec<PoolClaim> {
        deltas
            .iter()
            .enumerate()
            .map(|(order, &delta)| PoolClaim { order, delta })
            .collect()
    }

    #[test]
    fn no_rationing_when_demand_fits() {
        let a = allot(PoolKind::Integer, 10.0, &claims(&[-3.0, -7.0])).unwrap();
        assert_eq!(a.grants, vec![-3.0, -7.0]);
        assert!(!a.rationed);
        assert_eq!(a.remaining(), 0.0);
    }

    #[test]
    fn production_is_applied_before_consumption() {
        let a = allot(PoolKind::Integer, 2.0, &claims(&[-6.0, 4.0])).unwrap();
        assert_eq!(a.grants, vec![-6.0, 4.0]);
        assert_eq!(a.available, 6.0);
        assert!(!a.rationed);
    }

    #[test]
    fn largest_remainder_sums_to_availability() {
        // 10 units over requests 5, 5, 5: shares 3.33 each, one leftover unit
        // goes to the earliest claim.
        let a = allot(PoolKind::Integer, 10.0, &claims(&[-5.0, -5.0, -5.0])).unwrap();
        assert_eq!(a.grants, vec![-4.0, -3.0, -3.0]);
        assert_eq!(a.consumed(), 10.0);
        assert!(a.rationed);
    }

    #[test]
    fn ties_prefer_larger_request() {
        // 3 units over requests 2 and 4: shares 1.0 and 2.0, no leftover.
        let a = allot(PoolKind::Integer, 3.0, &claims(&[-2.0, -4.0])).unwrap();
        assert_eq!(a.grants, vec![-1.0, -2.0]);

        // 1 unit over requests 1 and 3: shares 0.25 and 0.75, the larger
        // remainder wins.
        let a = allot(PoolKind::Integer, 1.0, &claims(&[-1.0, -3.0])).unwrap();
        assert_eq!(a.grants, vec![0.0, -1.0]);

        // 1 unit over requests 2 and 2 with equal remainders: earlier claim wins.
        let a = allot(PoolKind::Integer, 1.0, &claims(&[-2.0, -2.0])).unwrap();
        assert_eq!(a.grants, vec![-1.0, 0.0]);
    }

    #[test]
    fn real_pools_scale_proportionally() {
        let a = allot(PoolKind::Real, 3.0, &claims(&[-2.0, -4.0])).unwrap();
        assert!((a.grants[0] + 1.0).abs() < 1e-12);
        assert!((a.grants[1] + 2.0).abs() < 1e-12);
        assert!(a.remaining() >= -REAL_TOLERANCE);
    }

    #[test]
    fn empty_pool_grants_nothing() {
        let a = allot(PoolKind::Integer, 0.0, &claims(&[-5.0, -1.0])).unwrap();
        assert_eq!(a.grants, vec![0.0, 0.0]);
    }

    #[test]
    fn rejects_negative_pool_and_fractional_integer_claims() {
        assert!(allot(PoolKind::Integer, -1.0, &claims(&[-1.0])).is_err());
        assert!(allot(PoolKind::Integer, 5.0, &claims(&[-1.5])).is_err());
        assert!(allot(PoolKind::Real, 5.0, &claims(&[f64::NAN])).is_err());
    }

    #[test]
    fn property_grants_never_exceed_requests_or_supply() {
        // Deterministic pseudo-random sweep.
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = |modulus: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % modulus
        };

        for _ in 0..500 {
            let current = next(50) as f64;
            let n = 1 + next(6) as usize;
            let deltas: Vec<f64> = (0..n)
                .map(|_| {
                    let magnitude = next(30) as f64;
                    if next(4) == 0 {
                        magnitude
                    } else {
                        -magnitude
                    }
                })
                .collect();
            let cs = claims(&deltas);
            let a = allot(PoolKind::Integer, current, &cs).unwrap();

            assert!(a.remaining() >= 0.0, "pool went negative: {:?}", a);
            if a.demand <= a.available {
                assert_eq!(a.grants, deltas, "unnecessary rationing");
            } else {
                assert_eq!(a.consumed(), a.available, "rationing must be exact");
            }
            for (g, d) in a.grants.iter().zip(&deltas) {
                assert!(g.abs() <= d.abs());
            }
        }
    }
}
