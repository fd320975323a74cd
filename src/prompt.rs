//! Instruction templates with `{context}`, `{history}` and `{question}` slots.
//!
//! A template is parsed once into literal text and slots. Construction
//! fails unless every slot appears, and any other `{identifier}` is rejected
//! as a typo. Rendering is a single pass over the parsed pieces, so braces
//! in retrieved chunks, in the history or in the question are copied as-is
//! and never treated as placeholders.
//!
//! Two presets ship with the crate: `creative` (quest invention that borrows
//! structure from the documents but none of their names) and `qa` (a
//! friendly assistant answering from documents and conversation).

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::PromptConfig;
use crate::error::RagError;

const CREATIVE_TEMPLATE: &str = r#"**RÔLE :** Tu es un assistant créatif pour des Game Designers.
Ton but est d'inventer de NOUVELLES quêtes uniques et originales en suivant les contraintes de l'utilisateur.

**DOCUMENTS DE RÉFÉRENCE (EXEMPLES DE STYLE) :**
{context}

**HISTORIQUE DE TA CONVERSATION AVEC L'UTILISATEUR:**
{history}

**INSTRUCTIONS CRITIQUES :**
1. **DISTINCTION FOND ET FORME :** Utilise les 'Documents' UNIQUEMENT pour comprendre la structure (titre, objectifs, format) et le ton (sérieux, drôle, épique).
2. **PAS DE COPIE :** N'utilise JAMAIS les noms propres, lieux, factions ou personnages spécifiques présents dans les documents (ex: n'utilise pas "Claire", "Arasaka", "Whiterun", etc. sauf si l'utilisateur le demande).
3. **PRIORITÉ À L'UTILISATEUR :** Si l'utilisateur demande des "éléphants dans un monde cyberpunk", c'est ta priorité absolue. Invente une histoire avec des éléphants, même si aucun document n'en parle.
4. **ADAPTATION DE L'UNIVERS :** Si les documents viennent de "Skyrim" mais que l'utilisateur demande du "Cyberpunk", garde la structure de la quête Skyrim (Étapes, Récompense) mais change tout le vocabulaire pour qu'il soit futuriste (Épée -> Katana Laser, Potion -> Injecteur).

**TÂCHE :**
Génère une quête basée sur la demande suivante : "{question}"
"#;

const QA_TEMPLATE: &str = r#"**RÔLE :** Tu es un assistant RAG amical et serviable.
Ton objectif principal est d'aider des développeurs de jeux vidéo à générer des quêtes pour leurs jeux. Pour cela tu disposes d'un échantillon d'exemples de quêtes fournies par les 'Documents'.
Tu disposes aussi de l'historique de la conversation. Si l'utilisateur te demande par exemple de changer un élément dans une quête, utilise cet historique pour pouvoir lui générer la même quête mais avec les changements qu'il désire.

**HISTORIQUE DE LA CONVERSATION :**
{history}

**INSTRUCTIONS :**
1. Réponds en te basant sur l'historique de ta conversation avec l'utilisateur et le contexte fourni par les documents.
2. Si la question est clairement en dehors du champ d'application des documents ou de la conversation, réponds-y directement comme un chatbot standard sans mentionner les documents et sans donner de message de refus.
3. Fais une réponse en rapport avec la question posée par l'utilisateur.
4. Ne mentionne JAMAIS le contenu des documents. Il est seulement là pour que tu puisses voir des exemples de quêtes semblables.

Documents :
{context}

Question : {question}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Context,
    History,
    Question,
}

impl Slot {
    const ALL: [Slot; 3] = [Slot::Context, Slot::History, Slot::Question];

    fn name(self) -> &'static str {
        match self {
            Slot::Context => "context",
            Slot::History => "history",
            Slot::Question => "question",
        }
    }

    fn parse(name: &str) -> Option<Slot> {
        Slot::ALL.into_iter().find(|s| s.name() == name)
    }
}

#[derive(Debug, Clone)]
enum Piece {
    Literal(String),
    Slot(Slot),
}

/// A validated instruction template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pieces: Vec<Piece>,
}

impl PromptTemplate {
    /// Parse and validate a template.
    pub fn new(text: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let name_len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            let name = &after[..name_len];

            if name_len > 0 && after[name_len..].starts_with('}') {
                let slot = Slot::parse(name).ok_or_else(|| {
                    RagError::Template(format!("unknown placeholder {{{}}}", name))
                })?;
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Slot(slot));
                rest = &after[name_len + 1..];
            } else {
                literal.push('{');
                rest = after;
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        for slot in Slot::ALL {
            if !pieces.iter().any(|p| matches!(p, Piece::Slot(s) if *s == slot)) {
                return Err(
                    RagError::Template(format!("missing placeholder {{{}}}", slot.name())).into(),
                );
            }
        }

        Ok(Self { pieces })
    }

    /// One of the built-in presets: `creative` or `qa`.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "creative" => Self::new(CREATIVE_TEMPLATE),
            "qa" => Self::new(QA_TEMPLATE),
            other => Err(RagError::Template(format!("unknown preset '{}'", other)).into()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt template: {}", path.display()))?;
        Self::new(&text).with_context(|| format!("Invalid prompt template: {}", path.display()))
    }

    /// The configured template: `template_path` if set, else the preset.
    pub fn from_config(config: &PromptConfig) -> Result<Self> {
        match &config.template_path {
            Some(path) => Self::from_file(path),
            None => Self::preset(&config.preset),
        }
    }

    /// Fill every slot.
    pub fn render(&self, context: &str, history: &str, question: &str) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Slot(Slot::Context) => out.push_str(context),
                Piece::Slot(Slot::History) => out.push_str(history),
                Piece::Slot(Slot::Question) => out.push_str(question),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse_and_fill_every_slot() {
        for name in ["creative", "qa"] {
            let t = PromptTemplate::preset(name).unwrap();
            let out = t.render("CTX", "HIST", "QUESTION");
            assert!(out.contains("CTX") && out.contains("HIST") && out.contains("QUESTION"));
            for slot in ["{context}", "{history}", "{question}"] {
                assert!(!out.contains(slot), "{} left in {}", slot, name);
            }
        }
    }

    #[test]
    fn missing_slot_is_rejected() {
        let err = PromptTemplate::new("Docs: {context}\nQ: {question}").unwrap_err();
        assert!(err.to_string().contains("{history}"));
    }

    #[test]
    fn unknown_slot_is_rejected() {
        let err = PromptTemplate::new("{context} {history} {question} {answer}").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::Template(_))
        ));
    }

    #[test]
    fn non_placeholder_braces_are_literal() {
        let t = PromptTemplate::new("json: { \"a\": 1 } {} {context}|{history}|{question}").unwrap();
        assert_eq!(
            t.render("c", "h", "q"),
            "json: { \"a\": 1 } {} c|h|q"
        );
    }

    #[test]
    fn values_are_not_reinterpreted() {
        let t = PromptTemplate::new("{context}|{history}|{question}").unwrap();
        let out = t.render("{history}", "{question}", "{context}");
        assert_eq!(out, "{history}|{question}|{context}");
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(PromptTemplate::preset("haiku").is_err());
    }
}
