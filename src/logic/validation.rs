use super::types::{PoolRecord, Query};
use crate::error::ValidatorError;
use crate::utils::constants::MAX_SANE_VALUE;

/// Check a miner's record against the schema and ordering rules of `query`.
///
/// A record that fails here is never scored; the dispatch coordinator turns it into an
/// absent payload.
pub fn validate_record(query: &Query, record: &PoolRecord) -> Result<(), ValidatorError> {
    let mut previous: Option<u64> = None;

    for (idx, sample) in record.samples.iter().enumerate() {
        if let Some(prev) = previous {
            if sample.timestamp <= prev {
                return Err(ValidatorError::MalformedResponse(format!(
                    "sample {idx}: timestamp {} not after {prev}",
                    sample.timestamp
                )));
            }
        }
        previous = Some(sample.timestamp);

        if sample.timestamp < query.start_time || sample.timestamp >= query.end_time {
            return Err(ValidatorError::MalformedResponse(format!(
                "sample {idx}: timestamp {} outside {}..{}",
                sample.timestamp, query.start_time, query.end_time
            )));
        }

        for (name, value) in [("price", sample.price), ("liquidity", sample.liquidity), ("volume", sample.volume)] {
            if !value.is_finite() || !(0.0..=MAX_SANE_VALUE).contains(&value) {
                return Err(ValidatorError::MalformedResponse(format!("sample {idx}: {name} = {value}")));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::types::{FeeTier, PoolSample};
    use alloy_primitives::Address;

    fn query() -> Query {
        Query::new(Address::repeat_byte(1), Address::repeat_byte(2), FeeTier::Medium, 1_000, 2_000, 100, 0)
    }

    #[test]
    fn test_valid_record() {
        let record = PoolRecord::new(vec![
            PoolSample::new(1_000, 1.5, 10.0, 0.0),
            PoolSample::new(1_100, 1.6, 10.0, 3.0),
        ]);
        assert!(validate_record(&query(), &record).is_ok());
        assert!(validate_record(&query(), &PoolRecord::default()).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_timestamps() {
        let record = PoolRecord::new(vec![
            PoolSample::new(1_100, 1.5, 10.0, 0.0),
            PoolSample::new(1_100, 1.6, 10.0, 3.0),
        ]);
        assert!(matches!(validate_record(&query(), &record), Err(ValidatorError::MalformedResponse(_))));
    }

    #[test]
    fn test_rejects_decreasing_timestamps() {
        let record = PoolRecord::new(vec![
            PoolSample::new(1_200, 1.5, 10.0, 0.0),
            PoolSample::new(1_100, 1.6, 10.0, 3.0),
        ]);
        assert!(validate_record(&query(), &record).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_timestamp() {
        let early = PoolRecord::new(vec![PoolSample::new(999, 1.0, 1.0, 1.0)]);
        let late = PoolRecord::new(vec![PoolSample::new(2_000, 1.0, 1.0, 1.0)]);
        assert!(validate_record(&query(), &early).is_err());
        assert!(validate_record(&query(), &late).is_err());
    }

    #[test]
    fn test_rejects_insane_values() {
        for bad in [f64::NAN, f64::INFINITY, -1.0, 1e61] {
            let record = PoolRecord::new(vec![PoolSample::new(1_000, bad, 1.0, 1.0)]);
            assert!(validate_record(&query(), &record).is_err(), "accepted {bad}");
        }
    }
}
