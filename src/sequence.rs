use crate::roman::PageLabel;

/// Produces the total order used for the final document: roman-numbered
/// front matter first (by numeral value), then the remaining labels with
/// integers ascending. Opaque labels keep their relative position from the
/// input order; integers are redistributed over the remaining slots.
///
/// The output is always a permutation of the input.
pub fn sequence_labels(labels: &[PageLabel]) -> Vec<PageLabel> {
    let mut romans: Vec<PageLabel> = labels
        .iter()
        .filter(|label| label.is_roman())
        .cloned()
        .collect();
    romans.sort_by_key(|label| label.roman_value());

    let rest: Vec<PageLabel> = labels
        .iter()
        .filter(|label| !label.is_roman())
        .cloned()
        .collect();

    let mut integers: Vec<i64> = rest.iter().filter_map(PageLabel::as_integer).collect();
    integers.sort_unstable();

    let mut next_integer = integers.into_iter();
    let mut ordered = romans;
    for label in rest {
        match label {
            PageLabel::Integer(_) => {
                // One sorted value exists for every integer slot.
                if let Some(value) = next_integer.next() {
                    ordered.push(PageLabel::Integer(value));
                }
            }
            other => ordered.push(other),
        }
    }

    ordered
}
