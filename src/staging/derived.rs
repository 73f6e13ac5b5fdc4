//! Fields computed from CSV columns while staging.

use csv::StringRecord;

use super::StageError;
use crate::config::DerivedColumn;

const ELEMENTARY_GRADES: &[&str] = &["KG", "01", "02", "03", "04", "05"];
const MIDDLE_LOW_GRADES: &[&str] = &["06", "07", "08"];
const MIDDLE_HIGH_GRADES: &[&str] = &["07", "08"];
const HIGH_GRADES: &[&str] = &["09", "10", "11", "12"];

/// School levels spanned by a lowest and highest grade, comma-joined.
///
/// Grades use the NCES codes (`PK`, `KG`, `01`..`12`). `Pre-K` is only
/// reported when the highest grade is `PK`.
pub fn school_level(low: &str, high: &str) -> String {
    let mut levels = Vec::new();
    if high == "PK" {
        levels.push("Pre-K");
    }
    if ELEMENTARY_GRADES.contains(&low) || ELEMENTARY_GRADES.contains(&high) {
        levels.push("Elementary");
    }
    if MIDDLE_LOW_GRADES.contains(&low) || MIDDLE_HIGH_GRADES.contains(&high) {
        levels.push("Middle");
    }
    if HIGH_GRADES.contains(&low) || HIGH_GRADES.contains(&high) {
        levels.push("High");
    }
    levels.join(",")
}

pub(super) enum Segment {
    Literal(String),
    Column(usize),
}

/// A derived column resolved against a CSV header.
pub(super) enum Deriver {
    Value(String),
    Template(Vec<Segment>),
    GradeLevels { low: usize, high: usize },
}

impl Deriver {
    pub(super) fn resolve(
        field: &str,
        column: &DerivedColumn,
        headers: &StringRecord,
    ) -> Result<Self, StageError> {
        let index = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| StageError::UnknownColumn {
                    field: field.to_string(),
                    column: name.to_string(),
                })
        };

        match column {
            DerivedColumn::Value(value) => Ok(Self::Value(value.clone())),
            DerivedColumn::Template(template) => {
                let mut segments = Vec::new();
                for (literal, name) in split_template(field, template)? {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(literal.to_string()));
                    }
                    if let Some(name) = name {
                        segments.push(Segment::Column(index(name)?));
                    }
                }
                Ok(Self::Template(segments))
            }
            DerivedColumn::GradeLevels { low, high } => Ok(Self::GradeLevels {
                low: index(low.as_str())?,
                high: index(high.as_str())?,
            }),
        }
    }

    /// Value for one row, or `None` when it comes out blank.
    ///
    /// A template whose columns are all blank in this row yields `None`.
    pub(super) fn derive(&self, row: &StringRecord) -> Option<String> {
        let cell = |index: usize| row.get(index).map(str::trim).unwrap_or_default();

        let value = match self {
            Self::Value(value) => value.clone(),
            Self::Template(segments) => {
                let mut text = String::new();
                let mut has_columns = false;
                let mut filled = false;
                for segment in segments {
                    match segment {
                        Segment::Literal(literal) => text.push_str(literal),
                        Segment::Column(index) => {
                            let value = cell(*index);
                            has_columns = true;
                            filled |= !value.is_empty();
                            text.push_str(value);
                        }
                    }
                }
                if has_columns && !filled {
                    return None;
                }
                text
            }
            Self::GradeLevels { low, high } => school_level(cell(*low), cell(*high)),
        };

        (!value.is_empty()).then_some(value)
    }
}

/// Split `a{X}b{Y}` into `[("a", Some("X")), ("b", Some("Y"))]`, with a
/// trailing `(rest, None)` when text follows the last placeholder.
fn split_template<'a>(
    field: &str,
    template: &'a str,
) -> Result<Vec<(&'a str, Option<&'a str>)>, StageError> {
    let mut parts = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| StageError::Template {
            field: field.to_string(),
            message: format!("unclosed '{{' in \"{}\"", template),
        })?;
        parts.push((&rest[..start], Some(&after[..end])));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        parts.push((rest, None));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> StringRecord {
        StringRecord::from(vec!["Street Address", "City", "State", "ZIP", "Low", "High"])
    }

    #[test]
    fn test_school_level() {
        assert_eq!(school_level("PK", "PK"), "Pre-K");
        assert_eq!(school_level("PK", "05"), "Elementary");
        assert_eq!(school_level("KG", "08"), "Elementary,Middle");
        assert_eq!(school_level("06", "08"), "Middle");
        assert_eq!(school_level("05", "06"), "Elementary");
        assert_eq!(school_level("06", "12"), "Middle,High");
        assert_eq!(school_level("09", "12"), "High");
        assert_eq!(school_level("KG", "12"), "Elementary,High");
        assert_eq!(school_level("UG", "UG"), "");
    }

    #[test]
    fn test_template_fills_columns() {
        let deriver = Deriver::resolve(
            "Address",
            &DerivedColumn::Template("{Street Address}, {City}, {State} {ZIP}".into()),
            &headers(),
        )
        .unwrap();

        let row = StringRecord::from(vec!["1 Main St", "Springfield", "CA", "90001", "", ""]);
        assert_eq!(
            deriver.derive(&row).as_deref(),
            Some("1 Main St, Springfield, CA 90001")
        );

        let blank = StringRecord::from(vec!["", " ", "", "", "", ""]);
        assert_eq!(deriver.derive(&blank), None);
    }

    #[test]
    fn test_grade_levels_and_values() {
        let levels = Deriver::resolve(
            "School-Level",
            &DerivedColumn::GradeLevels {
                low: "Low".into(),
                high: "High".into(),
            },
            &headers(),
        )
        .unwrap();
        let row = StringRecord::from(vec!["", "", "", "", "KG", "08"]);
        assert_eq!(levels.derive(&row).as_deref(), Some("Elementary,Middle"));
        let ungraded = StringRecord::from(vec!["", "", "", "", "UG", "UG"]);
        assert_eq!(levels.derive(&ungraded), None);

        let constant =
            Deriver::resolve("School-Type", &DerivedColumn::Value("Public".into()), &headers())
                .unwrap();
        assert_eq!(constant.derive(&row).as_deref(), Some("Public"));
    }

    #[test]
    fn test_resolve_errors() {
        let err = Deriver::resolve(
            "Address",
            &DerivedColumn::Template("{Street}, {City}".into()),
            &headers(),
        )
        .err()
        .unwrap();
        assert!(
            matches!(err, StageError::UnknownColumn { ref column, .. } if column == "Street")
        );

        let err = Deriver::resolve(
            "Address",
            &DerivedColumn::Template("{City".into()),
            &headers(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, StageError::Template { .. }));
    }
}
