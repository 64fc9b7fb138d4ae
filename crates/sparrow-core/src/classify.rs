use crate::dtype::Element;

/// Class reported for an input whose final activations are all zero.
pub const NO_MATCH: i32 = -1;

/// Predicted class of one final activation row.
///
/// The lowest index holding the strictly greatest positive value, or
/// [`NO_MATCH`] when nothing in the row is positive.
pub fn argmax_class<T: Element>(row: &[T]) -> i32 {
    let mut best = NO_MATCH;
    let mut best_val = T::zero();
    for (j, &v) in row.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = j as i32;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_first_maximum() {
        assert_eq!(argmax_class(&[0.0f32, 2.0, 5.0, 5.0]), 2);
        assert_eq!(argmax_class(&[1.0f64, 0.0, 0.5]), 0);
    }

    #[test]
    fn test_dead_row_is_no_match() {
        assert_eq!(argmax_class(&[0.0f32; 8]), NO_MATCH);
        assert_eq!(argmax_class::<f64>(&[]), NO_MATCH);
    }
}
