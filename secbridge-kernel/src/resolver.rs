/**
 * PACKAGE SET RESOLVER - Paquets déjà communiqués dans un ticket
 *
 * RÔLE :
 * Le moteur ne garde aucune trace locale des paquets notifiés. Ils sont
 * reconstruits à chaque passe en relisant la description (gabarit
 * "description") et chaque note (gabarit "note") du ticket.
 *
 * FONCTIONNEMENT :
 * - extraction du champ `{packages}` puis découpage sur les blancs
 * - un texte qui ne colle pas au gabarit n'apporte aucun paquet
 *   (commentaire humain, gabarit modifié entre deux versions...) mais
 *   n'interrompt jamais la résolution
 */

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::models::{unique_in_order, TrackedIssue};
use crate::templates::{Field, TemplateKind, Templates};

/// Ensemble de paquets, dédoublonné, ordre de première apparition conservé
#[derive(Debug, Clone, Default)]
pub struct PackageSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: String) -> bool {
        if self.members.contains(&package) {
            return false;
        }
        self.members.insert(package.clone());
        self.order.push(package);
        true
    }

    pub fn contains(&self, package: &str) -> bool {
        self.members.contains(package)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    /// Paquets observés absents de l'ensemble, ordre d'observation conservé
    pub fn unseen(&self, observed: &[String]) -> Vec<String> {
        unique_in_order(observed.iter().cloned())
            .into_iter()
            .filter(|package| !self.contains(package))
            .collect()
    }
}

impl PartialEq for PackageSet {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl Eq for PackageSet {}

impl Extend<String> for PackageSet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        for package in iter {
            self.insert(package);
        }
    }
}

impl FromIterator<String> for PackageSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = PackageSet::new();
        set.extend(iter);
        set
    }
}

pub struct PackageSetResolver<'t> {
    templates: &'t Templates,
}

impl<'t> PackageSetResolver<'t> {
    pub fn new(templates: &'t Templates) -> Self {
        Self { templates }
    }

    pub fn resolved_packages(&self, issue: &TrackedIssue) -> PackageSet {
        let mut packages = PackageSet::new();
        self.collect(issue, TemplateKind::Description, &issue.description, &mut packages);
        for note in &issue.notes {
            self.collect(issue, TemplateKind::Note, note, &mut packages);
        }
        packages
    }

    pub fn new_packages(&self, issue: &TrackedIssue, observed: &[String]) -> Vec<String> {
        self.resolved_packages(issue).unseen(observed)
    }

    fn collect(&self, issue: &TrackedIssue, kind: TemplateKind, text: &str, packages: &mut PackageSet) {
        match self.templates.get(kind).extract(text) {
            Ok(fields) => {
                if let Some(list) = fields.get(&Field::Packages) {
                    packages.extend(list.split_whitespace().map(str::to_string));
                }
            }
            // la description est toujours écrite par nous, une note peut être humaine
            Err(e) if kind == TemplateKind::Description => {
                warn!(issue_id = issue.id, error = %e, "description does not match template, no packages extracted");
            }
            Err(e) => {
                debug!(issue_id = issue.id, error = %e, "note ignored");
            }
        }
    }
}
