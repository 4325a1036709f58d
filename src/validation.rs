//! Argument and dataset checks run before any computation

use log::debug;

use crate::conditions::ConditionB;
use crate::data::ExpressionDataset;
use crate::dispersion::{DispersionMethod, DispersionParams, TrendFitMethod};
use crate::error::InputError;

/// User-supplied arguments of a differential expression run, unparsed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffExpArgs {
    /// Cell metadata column holding the condition labels
    pub conditions: Option<String>,
    pub condition_a: Option<String>,
    /// `rest` or a comma separated list of labels
    pub condition_b: Option<String>,
    pub fit_type: Option<String>,
    pub method: Option<String>,
    /// Number of top-ranked genes to test
    pub gene_limit: Option<String>,
}

impl DiffExpArgs {
    pub fn new(conditions: &str, condition_a: &str, condition_b: &str) -> Self {
        Self {
            conditions: Some(conditions.to_string()),
            condition_a: Some(condition_a.to_string()),
            condition_b: Some(condition_b.to_string()),
            ..Self::default()
        }
    }

    pub fn with_fit_type(mut self, fit_type: &str) -> Self {
        self.fit_type = Some(fit_type.to_string());
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    pub fn with_gene_limit(mut self, gene_limit: &str) -> Self {
        self.gene_limit = Some(gene_limit.to_string());
        self
    }
}

/// Arguments after validation, ready for the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct DiffExpRequest {
    pub column: String,
    pub label_a: String,
    pub condition_b: ConditionB,
    pub fit_type: TrendFitMethod,
    pub method: DispersionMethod,
    pub gene_limit: Option<usize>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, InputError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| InputError::MissingArgument {
            name: name.to_string(),
        })
}

fn parse_gene_limit(raw: &str) -> Result<usize, InputError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(InputError::NonNumericGeneLimit {
            value: raw.to_string(),
        }),
    }
}

/// Check `args` against `dataset` and parse them
///
/// Fails on the first problem found; nothing is computed. Fit type and
/// method default to `local` and `per-condition`.
pub fn validate_request(
    dataset: &ExpressionDataset,
    args: &DiffExpArgs,
) -> Result<DiffExpRequest, InputError> {
    validate_request_with(dataset, args, &DispersionParams::default())
}

/// Like [`validate_request`], taking fit type and method defaults from
/// `defaults`
pub fn validate_request_with(
    dataset: &ExpressionDataset,
    args: &DiffExpArgs,
    defaults: &DispersionParams,
) -> Result<DiffExpRequest, InputError> {
    dataset.validate()?;

    let column = required(&args.conditions, "conditions")?;
    if let Some(producer) = dataset.pending_prerequisite(column) {
        return Err(InputError::PrerequisiteMissing {
            column: column.to_string(),
            producer: producer.to_string(),
        });
    }

    let label_a = required(&args.condition_a, "condition_a")?;
    let condition_b = ConditionB::parse(required(&args.condition_b, "condition_b")?);
    if condition_b == ConditionB::Labels(Vec::new()) {
        return Err(InputError::MissingArgument {
            name: "condition_b".to_string(),
        });
    }

    let metadata = dataset.cell_metadata();
    if !metadata.contains_label(column, label_a)? {
        return Err(InputError::LabelNotFound {
            column: column.to_string(),
            label: label_a.to_string(),
        });
    }
    if let ConditionB::Labels(labels) = &condition_b {
        for label in labels {
            if !metadata.contains_label(column, label)? {
                return Err(InputError::LabelNotFound {
                    column: column.to_string(),
                    label: label.clone(),
                });
            }
        }
        if labels.iter().any(|l| l == label_a) {
            return Err(InputError::InvalidArgument {
                name: "condition_b".to_string(),
                reason: format!("label '{}' is also condition A", label_a),
            });
        }
    }

    let gene_limit = args.gene_limit.as_deref().map(parse_gene_limit).transpose()?;
    let fit_type = args
        .fit_type
        .as_deref()
        .map(str::parse::<TrendFitMethod>)
        .transpose()?
        .unwrap_or(defaults.fit_type);
    let method = args
        .method
        .as_deref()
        .map(str::parse::<DispersionMethod>)
        .transpose()?
        .unwrap_or(defaults.method);

    let request = DiffExpRequest {
        column: column.to_string(),
        label_a: label_a.to_string(),
        condition_b,
        fit_type,
        method,
        gene_limit,
    };
    debug!("Validated request: {:?}", request);
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellMetadata, CountMatrix, GeneMetadata};
    use ndarray::Array2;

    fn dataset() -> ExpressionDataset {
        let counts = Array2::from_shape_fn((3, 4), |(g, c)| (g + c) as f64);
        let genes: Vec<String> = (0..3).map(|g| format!("g{}", g)).collect();
        let cells: Vec<String> = (0..4).map(|c| format!("c{}", c)).collect();
        let matrix = CountMatrix::new(counts, genes, cells.clone()).unwrap();
        let mut meta = CellMetadata::new(cells);
        meta.add_column(
            "condition",
            vec!["ctrl".into(), "ctrl".into(), "treated".into(), "other".into()],
        )
        .unwrap();
        ExpressionDataset::new(matrix, meta).unwrap()
    }

    #[test]
    fn test_valid_request_defaults() {
        let req = validate_request(&dataset(), &DiffExpArgs::new("condition", "ctrl", "rest")).unwrap();
        assert_eq!(req.column, "condition");
        assert_eq!(req.condition_b, ConditionB::Rest);
        assert_eq!(req.fit_type, TrendFitMethod::Local);
        assert_eq!(req.method, DispersionMethod::PerCondition);
        assert_eq!(req.gene_limit, None);
    }

    #[test]
    fn test_explicit_options() {
        let args = DiffExpArgs::new("condition", "ctrl", "treated, other")
            .with_fit_type("parametric")
            .with_method("pooled")
            .with_gene_limit("2");
        let req = validate_request(&dataset(), &args).unwrap();
        assert_eq!(
            req.condition_b,
            ConditionB::Labels(vec!["treated".into(), "other".into()])
        );
        assert_eq!(req.fit_type, TrendFitMethod::Parametric);
        assert_eq!(req.method, DispersionMethod::Pooled);
        assert_eq!(req.gene_limit, Some(2));
    }

    #[test]
    fn test_configured_defaults() {
        let defaults = DispersionParams {
            fit_type: TrendFitMethod::Mean,
            method: DispersionMethod::Blind,
            ..DispersionParams::default()
        };
        let args = DiffExpArgs::new("condition", "ctrl", "rest");
        let req = validate_request_with(&dataset(), &args, &defaults).unwrap();
        assert_eq!(req.fit_type, TrendFitMethod::Mean);
        assert_eq!(req.method, DispersionMethod::Blind);

        let req = validate_request_with(&dataset(), &args.with_method("pooled"), &defaults).unwrap();
        assert_eq!(req.method, DispersionMethod::Pooled);
    }

    #[test]
    fn test_missing_arguments() {
        let mut args = DiffExpArgs::new("condition", "ctrl", "rest");
        args.condition_a = None;
        assert!(matches!(
            validate_request(&dataset(), &args),
            Err(InputError::MissingArgument { name }) if name == "condition_a"
        ));

        let args = DiffExpArgs::new("  ", "ctrl", "rest");
        assert!(matches!(
            validate_request(&dataset(), &args),
            Err(InputError::MissingArgument { .. })
        ));

        let args = DiffExpArgs::new("condition", "ctrl", " , ");
        assert!(matches!(
            validate_request(&dataset(), &args),
            Err(InputError::MissingArgument { name }) if name == "condition_b"
        ));
    }

    #[test]
    fn test_unknown_column_and_labels() {
        let ds = dataset();
        assert!(matches!(
            validate_request(&ds, &DiffExpArgs::new("batch", "ctrl", "rest")),
            Err(InputError::ColumnNotFound { .. })
        ));
        assert!(matches!(
            validate_request(&ds, &DiffExpArgs::new("condition", "nope", "rest")),
            Err(InputError::LabelNotFound { label, .. }) if label == "nope"
        ));
        assert!(matches!(
            validate_request(&ds, &DiffExpArgs::new("condition", "ctrl", "treated,nope")),
            Err(InputError::LabelNotFound { label, .. }) if label == "nope"
        ));
    }

    #[test]
    fn test_overlapping_groups_rejected() {
        let err = validate_request(&dataset(), &DiffExpArgs::new("condition", "ctrl", "ctrl,treated"))
            .unwrap_err();
        assert!(matches!(err, InputError::InvalidArgument { .. }));
    }

    #[test]
    fn test_prerequisite_missing() {
        let err = validate_request(&dataset(), &DiffExpArgs::new("cluster", "1", "rest")).unwrap_err();
        assert_eq!(
            err,
            InputError::PrerequisiteMissing {
                column: "cluster".to_string(),
                producer: "clustering".to_string(),
            }
        );
    }

    #[test]
    fn test_bad_gene_limit_and_options() {
        let ds = dataset();
        for limit in ["ten", "0", "-3", "2.5"] {
            let args = DiffExpArgs::new("condition", "ctrl", "rest").with_gene_limit(limit);
            assert!(matches!(
                validate_request(&ds, &args),
                Err(InputError::NonNumericGeneLimit { .. })
            ));
        }
        let args = DiffExpArgs::new("condition", "ctrl", "rest").with_fit_type("loess");
        assert!(matches!(validate_request(&ds, &args), Err(InputError::InvalidArgument { .. })));
        let args = DiffExpArgs::new("condition", "ctrl", "rest").with_method("shared");
        assert!(matches!(validate_request(&ds, &args), Err(InputError::InvalidArgument { .. })));
    }

    #[test]
    fn test_broken_dataset() {
        let ds = dataset();
        let genes = GeneMetadata::new(vec!["g0".into(), "g1".into()]);
        let broken = ExpressionDataset::from_parts(
            ds.counts().clone(),
            genes,
            ds.cell_metadata().clone(),
        );
        assert!(matches!(
            validate_request(&broken, &DiffExpArgs::new("condition", "ctrl", "rest")),
            Err(InputError::UnrecognizedDataset { .. })
        ));
    }
}
