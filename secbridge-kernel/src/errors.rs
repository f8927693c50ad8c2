/**
 * ERRORS - Taxonomie des erreurs de la réconciliation
 *
 * RÔLE :
 * Sépare ce qui relève du transport (supervision, tracker), du parsing
 * (sortie plugin, texte de ticket) et des violations d'invariant (mapping
 * dupliqué). Le moteur classe chaque échec par hôte via `ReconcileError::kind`
 * pour décider du niveau de log ; aucune erreur n'arrête la passe complète.
 */

use crate::models::IssueId;
use crate::store::StoreError;
use crate::templates::TemplateKind;

/// Échec d'un appel vers un collaborateur externe (Livestatus ou MantisBT)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {endpoint} failed: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} answered with status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("undecodable response from {service}: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },
    #[error("issue {0} not found in tracker")]
    IssueNotFound(IssueId),
}

/// Texte qui ne correspond pas à la forme attendue
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing column '{0}' in monitoring row")]
    MissingColumn(&'static str),
    #[error("unexpected plugin output: {0:?}")]
    PluginOutput(String),
    #[error("text does not match the {0} template")]
    TemplateMismatch(TemplateKind),
}

/// Classification grossière utilisée pour le logging et le rapport de passe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Parse,
    InvariantViolation,
    Store,
}

/// Échec du traitement d'un hôte
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invariant violation: {0}")]
    InvariantViolation(#[source] StoreError),
    #[error("mapping store failure: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateMapping { .. } => ReconcileError::InvariantViolation(err),
            other => ReconcileError::Store(other),
        }
    }
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Transport(_) => ErrorKind::Transport,
            ReconcileError::Parse(_) => ErrorKind::Parse,
            ReconcileError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            ReconcileError::Store(_) => ErrorKind::Store,
        }
    }
}
