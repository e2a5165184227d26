//! Resolution functions and their memoization.
//!
//! A resolution function combines the simultaneous driving values of a
//! resolved signal into one. The kernel only sees it through a narrow
//! closure contract; to avoid repeated closure calls it samples the function
//! once at attach time and, for small enumerated element domains, fully
//! tabulates the one- and two-input cases. An identity function (common for
//! single-driver resolved signals) is detected and short-circuited.

use std::sync::Arc;

/// The closure contract a resolution function is invoked through.
#[derive(Clone)]
pub enum ResolutionFn {
    /// Per-element scalar resolution: inputs are one scalar per non-null
    /// source, output is the resolved scalar.
    Scalar(Arc<dyn Fn(&[u64]) -> u64 + Send + Sync>),
    /// Whole-composite resolution: each input is the packed byte buffer of
    /// one source's contribution for the full composite; the output buffer
    /// is the resolved composite.
    Composite(Arc<dyn Fn(&[Vec<u8>], &mut [u8]) + Send + Sync>),
}

/// Memoized behavior of a scalar resolution function over an enumerated
/// element domain of at most [`ResMemo::MAX_DOMAIN`] literals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResMemo {
    domain: u8,
    /// `table1[a]` = resolve of the single input `a`.
    table1: Vec<u8>,
    /// `table2[a * domain + b]` = resolve of the two inputs `a, b`.
    table2: Vec<u8>,
}

impl ResMemo {
    /// Largest enumerated domain worth tabulating.
    pub const MAX_DOMAIN: u8 = 16;

    /// Builds the memo by sampling `func` over every 1- and 2-input
    /// combination of the domain. Returns `None` for domains larger than
    /// [`MAX_DOMAIN`](Self::MAX_DOMAIN) or functions producing values
    /// outside the domain.
    pub fn build(func: &dyn Fn(&[u64]) -> u64, domain: u8) -> Option<Self> {
        if domain == 0 || domain > Self::MAX_DOMAIN {
            return None;
        }
        let n = domain as usize;
        let mut table1 = Vec::with_capacity(n);
        for a in 0..n as u64 {
            let r = func(&[a]);
            if r >= domain as u64 {
                return None;
            }
            table1.push(r as u8);
        }
        let mut table2 = Vec::with_capacity(n * n);
        for a in 0..n as u64 {
            for b in 0..n as u64 {
                let r = func(&[a, b]);
                if r >= domain as u64 {
                    return None;
                }
                table2.push(r as u8);
            }
        }
        Some(Self {
            domain,
            table1,
            table2,
        })
    }

    /// Returns `true` if single-input resolution is the identity.
    pub fn is_identity(&self) -> bool {
        self.table1.iter().enumerate().all(|(i, &r)| r as usize == i)
    }

    /// One-input table lookup.
    pub fn lookup1(&self, a: u64) -> Option<u64> {
        self.table1.get(a as usize).map(|&r| r as u64)
    }

    /// Two-input table lookup.
    pub fn lookup2(&self, a: u64, b: u64) -> Option<u64> {
        if a >= self.domain as u64 || b >= self.domain as u64 {
            return None;
        }
        Some(self.table2[a as usize * self.domain as usize + b as usize] as u64)
    }
}

/// A resolution function attached to a signal, with its memo.
#[derive(Clone)]
pub struct Resolution {
    func: ResolutionFn,
    memo: Option<ResMemo>,
    identity: bool,
}

impl Resolution {
    /// Attaches a scalar resolution function, sampling a memo when the
    /// element domain is small enough to tabulate. `domain` is the number
    /// of enumeration literals of the element type, or `None` when the
    /// type is not a small enumeration.
    pub fn scalar(func: Arc<dyn Fn(&[u64]) -> u64 + Send + Sync>, domain: Option<u8>) -> Self {
        let memo = domain.and_then(|d| ResMemo::build(&*func, d));
        let identity = memo.as_ref().is_some_and(ResMemo::is_identity);
        Self {
            func: ResolutionFn::Scalar(func),
            memo,
            identity,
        }
    }

    /// Attaches a whole-composite resolution function.
    pub fn composite(func: Arc<dyn Fn(&[Vec<u8>], &mut [u8]) + Send + Sync>) -> Self {
        Self {
            func: ResolutionFn::Composite(func),
            memo: None,
            identity: false,
        }
    }

    /// Returns `true` if this resolution resolves whole composites.
    pub fn is_composite(&self) -> bool {
        matches!(self.func, ResolutionFn::Composite(_))
    }

    /// Returns `true` if a memo was tabulated.
    pub fn is_memoized(&self) -> bool {
        self.memo.is_some()
    }

    /// Returns `true` if single-input resolution is known to be identity.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Resolves one element. Uses, in order: the identity fast path, the
    /// memo tables, and finally the closure.
    ///
    /// # Panics
    ///
    /// Panics if called on a composite resolution.
    pub fn resolve_scalar(&self, inputs: &[u64]) -> u64 {
        let func = match &self.func {
            ResolutionFn::Scalar(f) => f,
            ResolutionFn::Composite(_) => {
                panic!("scalar resolution requested from composite function")
            }
        };
        match inputs {
            [single] => {
                if self.identity {
                    return *single;
                }
                if let Some(memo) = &self.memo {
                    if let Some(r) = memo.lookup1(*single) {
                        return r;
                    }
                }
                func(inputs)
            }
            [a, b] => {
                if let Some(memo) = &self.memo {
                    if let Some(r) = memo.lookup2(*a, *b) {
                        return r;
                    }
                }
                func(inputs)
            }
            _ => func(inputs),
        }
    }

    /// Resolves a whole composite into `output`.
    ///
    /// # Panics
    ///
    /// Panics if called on a scalar resolution.
    pub fn resolve_composite(&self, inputs: &[Vec<u8>], output: &mut [u8]) {
        match &self.func {
            ResolutionFn::Composite(f) => f(inputs, output),
            ResolutionFn::Scalar(_) => {
                panic!("composite resolution requested from scalar function")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrt_common::Logic;

    /// The IEEE 1164 `resolved` function expressed through the kernel's
    /// scalar closure contract (elements are `Logic` discriminant bytes).
    fn ieee_resolved() -> Arc<dyn Fn(&[u64]) -> u64 + Send + Sync> {
        Arc::new(|inputs: &[u64]| {
            let values: Vec<Logic> = inputs
                .iter()
                .map(|&v| Logic::from_byte(v as u8).unwrap_or(Logic::X))
                .collect();
            Logic::resolve_all(&values).as_byte() as u64
        })
    }

    #[test]
    fn memo_matches_closure_exhaustively() {
        let func = ieee_resolved();
        let memo = ResMemo::build(&*func, Logic::COUNT as u8).unwrap();
        for a in 0..Logic::COUNT as u64 {
            assert_eq!(memo.lookup1(a), Some(func(&[a])));
            for b in 0..Logic::COUNT as u64 {
                assert_eq!(memo.lookup2(a, b), Some(func(&[a, b])));
            }
        }
    }

    #[test]
    fn memo_rejects_large_domain() {
        let func = |_: &[u64]| 0u64;
        assert!(ResMemo::build(&func, 17).is_none());
        assert!(ResMemo::build(&func, 0).is_none());
        assert!(ResMemo::build(&func, 16).is_some());
    }

    #[test]
    fn memo_rejects_out_of_domain_result() {
        let func = |_: &[u64]| 99u64;
        assert!(ResMemo::build(&func, 4).is_none());
    }

    #[test]
    fn identity_detected() {
        let res = Resolution::scalar(Arc::new(|inputs| inputs[0]), Some(4));
        assert!(res.is_identity());
        assert!(res.is_memoized());
        assert_eq!(res.resolve_scalar(&[3]), 3);
    }

    #[test]
    fn ieee_resolved_single_input_is_identity() {
        let res = Resolution::scalar(ieee_resolved(), Some(Logic::COUNT as u8));
        // resolve(v) folds Z against v, which is the identity except for '-'
        assert!(!res.is_identity());
        assert_eq!(
            res.resolve_scalar(&[Logic::One.as_byte() as u64]),
            Logic::One.as_byte() as u64
        );
        assert_eq!(
            res.resolve_scalar(&[Logic::DontCare.as_byte() as u64]),
            Logic::X.as_byte() as u64
        );
    }

    #[test]
    fn two_input_resolution() {
        let res = Resolution::scalar(ieee_resolved(), Some(Logic::COUNT as u8));
        let one = Logic::One.as_byte() as u64;
        let zero = Logic::Zero.as_byte() as u64;
        assert_eq!(res.resolve_scalar(&[one, zero]), Logic::X.as_byte() as u64);
    }

    #[test]
    fn many_input_falls_back_to_closure() {
        let res = Resolution::scalar(ieee_resolved(), Some(Logic::COUNT as u8));
        let z = Logic::Z.as_byte() as u64;
        let h = Logic::H.as_byte() as u64;
        assert_eq!(res.resolve_scalar(&[z, z, h]), h);
    }

    #[test]
    fn unmemoized_uses_closure() {
        let res = Resolution::scalar(Arc::new(|inputs| inputs.iter().copied().max().unwrap_or(0)), None);
        assert!(!res.is_memoized());
        assert!(!res.is_identity());
        assert_eq!(res.resolve_scalar(&[5]), 5);
        assert_eq!(res.resolve_scalar(&[200, 100]), 200);
    }

    #[test]
    fn composite_resolution() {
        // Byte-wise wired-or of all contributions
        let res = Resolution::composite(Arc::new(|inputs: &[Vec<u8>], out: &mut [u8]| {
            out.fill(0);
            for input in inputs {
                for (o, i) in out.iter_mut().zip(input) {
                    *o |= i;
                }
            }
        }));
        assert!(res.is_composite());
        let mut out = vec![0u8; 2];
        res.resolve_composite(&[vec![0b01, 0b10], vec![0b10, 0b10]], &mut out);
        assert_eq!(out, vec![0b11, 0b10]);
    }

    #[test]
    #[should_panic]
    fn scalar_on_composite_panics() {
        let res = Resolution::composite(Arc::new(|_: &[Vec<u8>], _: &mut [u8]| {}));
        let _ = res.resolve_scalar(&[1]);
    }
}
