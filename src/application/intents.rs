use std::collections::HashSet;

/// Abstract user goal inferred from the utterance. The set is closed; tools
/// declare which of these they can satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    AccessTime,
    AccessNetwork,
    GenerateCode,
    EditFiles,
    AccessFilesystem,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::AccessTime,
        Intent::AccessNetwork,
        Intent::GenerateCode,
        Intent::EditFiles,
        Intent::AccessFilesystem,
    ];

    /// Trigger phrases, matched as case-insensitive substrings. This is a
    /// heuristic approximation of the user's goal, not a semantic classifier.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Intent::AccessTime => &["time", "date", "now", "current time", "current date"],
            Intent::AccessNetwork => &["fetch", "download", "http", "api"],
            Intent::GenerateCode => &["write code", "generate", "program"],
            Intent::EditFiles => &[
                "edit",
                "modify",
                "change file",
                "create file",
                "write file",
                "save file",
                "add file",
            ],
            Intent::AccessFilesystem => &[
                "current working directory",
                "working directory",
                "current directory",
                "cwd",
                "show path",
                "current path",
                "pwd",
            ],
        }
    }
}

/// Ambiguity is resolved by returning every matching intent, which pushes
/// conservatism into the capability gate.
pub fn infer_intents(text: &str) -> HashSet<Intent> {
    let text = text.to_lowercase();
    Intent::ALL
        .iter()
        .copied()
        .filter(|intent| {
            intent
                .keywords()
                .iter()
                .any(|keyword| text.contains(keyword))
        })
        .collect()
}
