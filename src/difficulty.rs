//! Required target for a height, computed from whatever headers the caller can see.
//!
//! Two regimes are separated by [`Params::moving_average_height`]:
//!
//! * **legacy**: difficulty only changes at the last height of each retarget period. This
//!   crate never replays legacy retargeting; the target at a boundary is read off a header
//!   the caller already trusts (a checkpoint or local chain data), and every other legacy
//!   height is [`RequiredTarget::Unknown`].
//! * **moving average**: every height is recomputed from the
//!   [`Params::moving_average_window`] headers directly below it (Dark Gravity Wave v3).
//!
//! Headers come through the [`HeaderLookup`] capability so the same code runs against an
//! on-disk chain, a sparse checkpoint set or a test fixture.
use std::{
    collections::{BTreeMap, HashMap},
    convert::Infallible,
    hash::BuildHasher,
};

use primitive_types::{U256, U512};

use crate::{header::Header, params::Params, pow::Target};

/// Read access to headers by height.
pub trait HeaderLookup {
    /// Failure to read (I/O for disk-backed lookups).
    type Error;

    /// Header at `height`, or `None` if this lookup does not know it.
    fn header_at(&self, height: u32) -> Result<Option<Header>, Self::Error>;
}

impl HeaderLookup for BTreeMap<u32, Header> {
    type Error = Infallible;

    fn header_at(&self, height: u32) -> Result<Option<Header>, Infallible> {
        Ok(self.get(&height).copied())
    }
}

impl<S: BuildHasher> HeaderLookup for HashMap<u32, Header, S> {
    type Error = Infallible;

    fn header_at(&self, height: u32) -> Result<Option<Header>, Infallible> {
        Ok(self.get(&height).copied())
    }
}

impl<T: HeaderLookup + ?Sized> HeaderLookup for &T {
    type Error = T::Error;

    fn header_at(&self, height: u32) -> Result<Option<Header>, T::Error> {
        (**self).header_at(height)
    }
}

/// Consult `0` first, then fall back to `1`.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<A, B>(pub A, pub B);

impl<A, B> HeaderLookup for Overlay<A, B>
where
    A: HeaderLookup,
    B: HeaderLookup,
    B::Error: Into<A::Error>,
{
    type Error = A::Error;

    fn header_at(&self, height: u32) -> Result<Option<Header>, A::Error> {
        match self.0.header_at(height)? {
            Some(h) => Ok(Some(h)),
            None => self.1.header_at(height).map_err(Into::into),
        }
    }
}

/// Outcome of [`target_for_height`].
///
/// `Unknown` means "cannot verify", never "anything goes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredTarget {
    /// The easiest target a header at this height may carry.
    Known(Target),
    /// The lookup lacks the headers needed to decide.
    Unknown,
}

impl RequiredTarget {
    /// The target, if known.
    pub fn known(self) -> Option<Target> {
        match self {
            RequiredTarget::Known(t) => Some(t),
            RequiredTarget::Unknown => None,
        }
    }
}

/// Required target for a header at `height`, given the headers `lookup` can provide.
///
/// Pure apart from reads through `lookup`; the result does not depend on the
/// lookup's internal ordering.
pub fn target_for_height<L>(
    params: &Params,
    height: u32,
    lookup: &L,
) -> Result<RequiredTarget, L::Error>
where
    L: HeaderLookup + ?Sized,
{
    if params.no_retargeting {
        return Ok(RequiredTarget::Known(params.pow_limit));
    }
    if height < params.moving_average_height {
        return legacy_target(params, height, lookup);
    }
    moving_average_target(params, height, lookup)
}

fn legacy_target<L>(params: &Params, height: u32, lookup: &L) -> Result<RequiredTarget, L::Error>
where
    L: HeaderLookup + ?Sized,
{
    if !params.is_retarget_boundary(height) {
        return Ok(RequiredTarget::Unknown);
    }
    Ok(lookup
        .header_at(height)?
        .and_then(|h| Target::from_compact(h.bits).ok())
        .map_or(RequiredTarget::Unknown, RequiredTarget::Known))
}

/// Dark Gravity Wave v3 over the `window` headers below `height`.
fn moving_average_target<L>(
    params: &Params,
    height: u32,
    lookup: &L,
) -> Result<RequiredTarget, L::Error>
where
    L: HeaderLookup + ?Sized,
{
    let window = params.moving_average_window;
    if window == 0 || height < window {
        return Ok(RequiredTarget::Unknown);
    }

    let mut average = U512::zero();
    let mut actual_timespan: i64 = 0;
    let mut newer_time: Option<u32> = None;

    for count in 1..=window {
        let Some(header) = lookup.header_at(height - count)? else {
            return Ok(RequiredTarget::Unknown);
        };
        let Ok(target) = Target::from_compact(header.bits) else {
            return Ok(RequiredTarget::Unknown);
        };
        let target = U512::from(target.as_u256());

        // Reference weighting: the second step divides by 3, not 2.
        average = if count == 1 {
            target
        } else {
            (average * U512::from(count) + target) / U512::from(count + 1)
        };

        if let Some(newer) = newer_time {
            actual_timespan += i64::from(newer) - i64::from(header.time);
        }
        newer_time = Some(header.time);
    }

    let target_timespan = i64::from(window) * params.pow_target_spacing as i64;
    let actual_timespan = actual_timespan.clamp(target_timespan / 3, target_timespan * 3);

    let scaled = average * U512::from(actual_timespan as u64) / U512::from(target_timespan as u64);
    let limit = U512::from(params.pow_limit.as_u256());
    let bounded = scaled.min(limit);

    Ok(RequiredTarget::Known(
        U256::try_from(bounded).map_or(params.pow_limit, Target::new),
    ))
}
