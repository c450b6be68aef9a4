//! Field math — raw integer sequence to delta / delta-of-delta transforms and
//! their inverses, each carrying running state across block boundaries
//! (§4.3).

/// Delta-of-delta extraction for the time path.
///
/// Returns `(dod, next_last_ts, next_last_delta)`; feed those back in as
/// `last_ts`/`last_dt` for the following block on the same stream.
pub fn time_deltas(raw: &[i64], last_ts: i64, last_dt: i64) -> (Vec<i64>, i64, i64) {
    let mut prev_ts = last_ts;
    let mut prev_dt = last_dt;
    let mut dod = Vec::with_capacity(raw.len());
    for &ts in raw {
        let dt = ts.wrapping_sub(prev_ts);
        dod.push(dt.wrapping_sub(prev_dt));
        prev_dt = dt;
        prev_ts = ts;
    }
    (dod, prev_ts, prev_dt)
}

/// Inverse of [`time_deltas`].
pub fn undo_time_deltas(dod: &[i64], last_ts: i64, last_dt: i64) -> (Vec<i64>, i64, i64) {
    let mut prev_ts = last_ts;
    let mut prev_dt = last_dt;
    let mut out = Vec::with_capacity(dod.len());
    for &dd in dod {
        let dt = prev_dt.wrapping_add(dd);
        let ts = prev_ts.wrapping_add(dt);
        out.push(ts);
        prev_dt = dt;
        prev_ts = ts;
    }
    (out, prev_ts, prev_dt)
}

/// First differences for the value path.
///
/// Returns `(deltas, next_last_v)`.
pub fn value_deltas(raw: &[i64], last_v: i64) -> (Vec<i64>, i64) {
    let mut prev = last_v;
    let mut out = Vec::with_capacity(raw.len());
    for &v in raw {
        out.push(v.wrapping_sub(prev));
        prev = v;
    }
    (out, prev)
}

/// Inverse of [`value_deltas`].
pub fn undo_value_deltas(deltas: &[i64], last_v: i64) -> (Vec<i64>, i64) {
    let mut prev = last_v;
    let mut out = Vec::with_capacity(deltas.len());
    for &d in deltas {
        let v = prev.wrapping_add(d);
        out.push(v);
        prev = v;
    }
    (out, prev)
}

/// Reconstruct a raw sequence from a delta or delta-of-delta stream,
/// dispatching on `is_dod` so callers that don't statically know the stream
/// kind (e.g. a generic recovery scanner) can still invert it.
pub fn reconstruct(stream: &[i64], last_v: i64, last_d: i64, is_dod: bool) -> (Vec<i64>, i64, i64) {
    if is_dod {
        undo_time_deltas(stream, last_v, last_d)
    } else {
        let (out, next_v) = undo_value_deltas(stream, last_v);
        (out, next_v, last_d)
    }
}

/// Whether every value in `block` can be carried through the i64 integer
/// pipeline and reconstructed bit-for-bit as the original `f64` (§4.7
/// "Floating-point fields that cannot be losslessly integerized fall back
/// to FIXED64_LE").
///
/// Round-tripping through `as i64` and back must reproduce the exact bit
/// pattern — this rejects `NaN`, `±Infinity`, fractional values, magnitudes
/// i64 cannot hold, and `-0.0` (whose bit pattern an `i64` roundtrip cannot
/// preserve), in one check.
pub fn f64_block_is_integerizable(block: &[f64]) -> bool {
    block.iter().all(|&v| v.is_finite() && v.fract() == 0.0 && (v as i64 as f64).to_bits() == v.to_bits())
}

/// Convert an integerizable `f64` block to `i64` (see
/// [`f64_block_is_integerizable`]).
pub fn f64_block_to_i64(block: &[f64]) -> Vec<i64> {
    block.iter().map(|&v| v as i64).collect()
}

pub fn i64_block_to_f64(block: &[i64]) -> Vec<f64> {
    block.iter().map(|&v| v as f64).collect()
}

/// Bit-exact fallback encoding used by FIXED64_LE: the raw IEEE-754 bit
/// pattern reinterpreted as `i64`, which preserves `NaN` payloads, `-0.0`,
/// and infinities exactly.
pub fn f64_block_to_bits(block: &[f64]) -> Vec<i64> {
    block.iter().map(|&v| v.to_bits() as i64).collect()
}

pub fn bits_block_to_f64(block: &[i64]) -> Vec<f64> {
    block.iter().map(|&v| f64::from_bits(v as u64)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_deltas_roundtrip() {
        let raw = [1000i64, 2000, 3005, 4001, 5500, 5501];
        let (dod, last_ts, last_dt) = time_deltas(&raw, 0, 0);
        let (back, _, _) = undo_time_deltas(&dod, 0, 0);
        assert_eq!(back, raw);
        assert_eq!(last_ts, *raw.last().unwrap());
        let _ = last_dt;
    }

    #[test]
    fn value_deltas_roundtrip() {
        let raw = [100i64, 105, 90, 90, 200, -50];
        let (deltas, last_v) = value_deltas(&raw, 0);
        let (back, _) = undo_value_deltas(&deltas, 0);
        assert_eq!(back, raw);
        assert_eq!(last_v, *raw.last().unwrap());
    }

    #[test]
    fn chained_blocks_preserve_state() {
        let block_a = [10i64, 20, 30];
        let block_b = [40i64, 25];
        let (d1, next_v) = (value_deltas(&block_a, 0).0, value_deltas(&block_a, 0).1);
        let (d2, _) = value_deltas(&block_b, next_v);

        let (back1, v1) = undo_value_deltas(&d1, 0);
        let (back2, _) = undo_value_deltas(&d2, v1);
        assert_eq!(back1, block_a);
        assert_eq!(back2, block_b);
    }

    #[test]
    fn reconstruct_dispatches_on_is_dod() {
        let raw = [5i64, 6, 9];
        let (deltas, last_v) = value_deltas(&raw, 0);
        let (back, _, _) = reconstruct(&deltas, 0, 0, false);
        assert_eq!(back, raw);
        let _ = last_v;
    }
}
