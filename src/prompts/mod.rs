//! Zero-shot label prompts per benchmark dataset.
//!
//! Each dataset has an ordered list of human-readable class names (index ==
//! label id) and a list of prompt templates containing one `{}` placeholder.
//! Rendering every template for every class gives the text the zero-shot
//! classifier is built from.

mod imagenet;
mod tables;

pub use imagenet::{IMAGENET_CLASSES, IMAGENET_TEMPLATES};
pub use tables::{
    CIFAR100_CLASSES, CIFAR100_TEMPLATES, ISIC_CLASSES, ISIC_TEMPLATES, MNIST_CLASSES,
    MNIST_TEMPLATES,
};

use crate::datasets::DatasetName;

/// Class names and prompt templates of one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPrompts {
    /// Class names in label order.
    pub classes: &'static [&'static str],
    /// Templates with a `{}` placeholder for the class name.
    pub templates: &'static [&'static str],
}

impl TextPrompts {
    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// All prompts for class `label`, one per template.
    pub fn prompts_for(&self, label: usize) -> Option<Vec<String>> {
        let class = self.classes.get(label)?;
        Some(
            self.templates
                .iter()
                .map(|template| render_template(template, class))
                .collect(),
        )
    }
}

/// Substitutes `class` into the `{}` placeholder of `template`.
pub fn render_template(template: &str, class: &str) -> String {
    template.replacen("{}", class, 1)
}

/// Returns the class names and templates for `name`.
pub fn get_labels_textprompts(name: DatasetName) -> TextPrompts {
    match name {
        DatasetName::ImagenetV2 => TextPrompts {
            classes: &IMAGENET_CLASSES,
            templates: &IMAGENET_TEMPLATES,
        },
        DatasetName::Cifar100 => TextPrompts {
            classes: &CIFAR100_CLASSES,
            templates: &CIFAR100_TEMPLATES,
        },
        DatasetName::Isic2018 => TextPrompts {
            classes: &ISIC_CLASSES,
            templates: &ISIC_TEMPLATES,
        },
        DatasetName::Mnist => TextPrompts {
            classes: &MNIST_CLASSES,
            templates: &MNIST_TEMPLATES,
        },
    }
}
