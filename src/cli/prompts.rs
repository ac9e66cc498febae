//! Prompt listing.

use crate::{
    datasets::DatasetName,
    error::{Error, Result},
    prompts::{get_labels_textprompts, TextPrompts},
};

/// Renders the prompts of `class`, or the first `limit` class names.
pub(crate) fn format_prompts(
    prompts: &TextPrompts,
    class: Option<usize>,
    limit: usize,
) -> Result<String> {
    let mut lines = Vec::new();
    match class {
        Some(label) => {
            let rendered = prompts.prompts_for(label).ok_or_else(|| {
                Error::invalid_config(format!(
                    "class {label} out of range, dataset has {}",
                    prompts.num_classes()
                ))
            })?;
            lines.push(format!("{label}: {}", prompts.classes[label]));
            lines.extend(rendered.into_iter().map(|p| format!("  {p}")));
        }
        None => {
            lines.push(format!(
                "{} classes, {} templates",
                prompts.num_classes(),
                prompts.templates.len()
            ));
            for (id, name) in prompts.classes.iter().enumerate().take(limit) {
                lines.push(format!("{id:>5}  {name}"));
            }
            if prompts.num_classes() > limit {
                lines.push(format!("  ... {} more", prompts.num_classes() - limit));
            }
        }
    }
    Ok(lines.join("\n"))
}

pub(crate) fn cmd_prompts(dataset: &str, class: Option<usize>, limit: usize) -> Result<()> {
    let name: DatasetName = dataset.parse()?;
    println!("{}", format_prompts(&get_labels_textprompts(name), class, limit)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_listing_is_truncated() {
        let prompts = get_labels_textprompts(DatasetName::Cifar100);
        let text = format_prompts(&prompts, None, 3).unwrap();
        assert!(text.starts_with("100 classes"));
        assert!(text.contains("... 97 more"));
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn test_single_class_prompts() {
        let prompts = get_labels_textprompts(DatasetName::Mnist);
        let text = format_prompts(&prompts, Some(3), 10).unwrap();
        assert_eq!(text.lines().count(), 1 + prompts.templates.len());
        assert!(format_prompts(&prompts, Some(10), 10).is_err());
    }

    #[test]
    fn test_unknown_dataset() {
        assert!(cmd_prompts("SVHN", None, 5).is_err());
    }
}
