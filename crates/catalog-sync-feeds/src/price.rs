use catalog_sync::FillError;

/// Convert an upstream euro amount to cents.
pub fn to_cents(price: f64) -> Result<i64, FillError> {
    if !price.is_finite() || price < 0.0 {
        return Err(FillError::Invalid(format!("price {price}")));
    }
    Ok((price * 100.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_cent() {
        assert_eq!(to_cents(12.5).unwrap(), 1250);
        assert_eq!(to_cents(9.99).unwrap(), 999);
        assert_eq!(to_cents(0.0).unwrap(), 0);
    }

    #[test]
    fn rejects_negative_and_nan() {
        assert!(to_cents(-1.0).is_err());
        assert!(to_cents(f64::NAN).is_err());
    }
}
