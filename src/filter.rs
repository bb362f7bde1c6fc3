//! Keyword allow-list deciding whether a request is worth a generation.

/// Canned answer streamed back for off-topic requests.
pub const REFUSAL_TEXT: &str = "Mi dispiace, posso rispondere solo a domande di informatica, \
                                programmazione e tecnologia. Prova a riformulare la richiesta.";

const DEFAULT_KEYWORDS: &[&str] = &[
    "algoritm", "android", "backend", "bash", "bug", "c++", "cloud", "codice",
    "compil", "computer", "container", "css", "database", "debug", "devops", "docker",
    "excel", "file", "framework", "frontend", "funzion", "git", "html", "http", "informatic",
    "java", "javascript", "json", "kotlin", "kubernetes", "linux", "machine learning",
    "memoria", "network", "node", "password", "programm", "python", "query", "react",
    "rust", "script", "server", "sicurezza", "software", "sql", "terminale",
    "thread", "typescript", "variabil", "windows",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    InDomain,
    OutOfDomain,
}

#[derive(Debug, Clone)]
pub struct ContentFilter {
    keywords: Vec<String>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().copied())
    }
}

impl ContentFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn classify(&self, text: &str) -> Classification {
        let lowered = text.to_lowercase();
        if self.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            Classification::InDomain
        } else {
            Classification::OutOfDomain
        }
    }
}
