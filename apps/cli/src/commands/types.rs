//! Command type definitions shared between main.rs and the command modules.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum DatasetCommand {
    /// Create a dataset in a project
    Create {
        /// Owning project
        #[arg(short, long)]
        project: String,

        /// Dataset name
        #[arg(short, long)]
        name: String,
    },

    /// Add entries to a dataset
    AddEntry {
        /// Dataset ID
        dataset_id: String,

        /// Split of the new entries (train, test)
        #[arg(short, long, default_value = "train")]
        split: String,

        /// Number of entries to add
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Flag an entry as superseded
    MarkOutdated {
        /// Entry ID
        entry_id: String,

        /// Clear the flag instead
        #[arg(long)]
        undo: bool,
    },

    /// Move an entry to another split
    SetSplit {
        /// Entry ID
        entry_id: String,

        /// New split (train, test)
        split: String,
    },

    /// Add a pruning rule to a dataset
    AddRule {
        /// Dataset ID
        dataset_id: String,

        /// Text the rule removes from training examples
        #[arg(short, long)]
        text: String,

        /// Token count of the text (defaults to its word count)
        #[arg(long)]
        tokens: Option<u32>,
    },

    /// Edit a dataset pruning rule
    UpdateRule {
        /// Rule ID
        rule_id: String,

        /// New text
        #[arg(short, long)]
        text: String,

        /// Token count of the text (defaults to its word count)
        #[arg(long)]
        tokens: Option<u32>,
    },

    /// Record that a pruning rule matched an entry
    AddMatch {
        /// Rule ID
        rule_id: String,

        /// Entry ID
        entry_id: String,
    },

    /// Delete a dataset pruning rule
    DeleteRule {
        /// Rule ID
        rule_id: String,
    },
}
