/**
 * TEMPLATES - Rendu et lecture inverse des messages de ticket
 *
 * RÔLE :
 * Les textes envoyés au tracker (résumé, description, note, clôture) viennent
 * de gabarits configurables à placeholders `{host_name}`, `{packages}`,
 * `{all_packages}`. Le même gabarit sert dans les deux sens :
 * - render : substitution simple des champs
 * - extract : retrouve la valeur des champs dans un texte déjà rendu
 *
 * FONCTIONNEMENT :
 * Un gabarit est compilé en segments (littéral | champ). L'extraction suit les
 * littéraux et capture ce qui se trouve entre eux, au plus court d'abord, avec
 * retour arrière si la suite ne colle pas. Deux champs adjacents sont refusés
 * à la compilation (découpage ambigu).
 */

use std::collections::HashMap;
use std::fmt;

use crate::errors::ParseError;

/// Les quatre messages connus du cycle de vie d'un ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Summary,
    Description,
    Note,
    Close,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TemplateKind::Summary => "summary",
            TemplateKind::Description => "description",
            TemplateKind::Note => "note",
            TemplateKind::Close => "close",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    HostName,
    Packages,
    AllPackages,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::HostName => "host_name",
            Field::Packages => "packages",
            Field::AllPackages => "all_packages",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "host_name" => Some(Field::HostName),
            "packages" => Some(Field::Packages),
            "all_packages" => Some(Field::AllPackages),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("{kind} template: unknown placeholder '{{{name}}}'")]
    UnknownField { kind: TemplateKind, name: String },
    #[error("{kind} template: unclosed placeholder")]
    Unclosed { kind: TemplateKind },
    #[error("{kind} template: two placeholders must be separated by text")]
    AdjacentFields { kind: TemplateKind },
    #[error("{kind} template must contain '{{{field}}}'")]
    MissingField { kind: TemplateKind, field: &'static str },
}

/// Valeurs substituées dans un gabarit, listes de paquets jointes par un espace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateFields {
    pub host_name: String,
    pub packages: String,
    pub all_packages: String,
}

impl TemplateFields {
    pub fn new(host_name: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            ..Self::default()
        }
    }

    pub fn packages<S: AsRef<str>>(mut self, packages: &[S]) -> Self {
        self.packages = join(packages);
        self
    }

    pub fn all_packages<S: AsRef<str>>(mut self, packages: &[S]) -> Self {
        self.all_packages = join(packages);
        self
    }

    fn value(&self, field: Field) -> &str {
        match field {
            Field::HostName => &self.host_name,
            Field::Packages => &self.packages,
            Field::AllPackages => &self.all_packages,
        }
    }
}

fn join<S: AsRef<str>>(items: &[S]) -> String {
    items.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

#[derive(Debug, Clone)]
pub struct Template {
    kind: TemplateKind,
    segments: Vec<Segment>,
}

impl Template {
    pub fn compile(kind: TemplateKind, source: &str) -> Result<Self, TemplateError> {
        let source = normalize(source);
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => name.push(c),
                    None => return Err(TemplateError::Unclosed { kind }),
                }
            }
            let field = Field::from_name(name.trim())
                .ok_or_else(|| TemplateError::UnknownField { kind, name: name.clone() })?;

            if literal.is_empty() {
                if let Some(Segment::Field(_)) = segments.last() {
                    return Err(TemplateError::AdjacentFields { kind });
                }
            } else {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Field(field));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { kind, segments })
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.segments.contains(&Segment::Field(field))
    }

    pub fn render(&self, fields: &TemplateFields) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(fields.value(*field)),
            }
        }
        out
    }

    /// Lecture inverse : valeur de chaque champ dans un texte rendu par ce gabarit
    pub fn extract(&self, text: &str) -> Result<HashMap<Field, String>, ParseError> {
        let text = normalize(text);
        let mut captures = Vec::new();
        if !match_segments(&self.segments, &text, &mut captures) {
            return Err(ParseError::TemplateMismatch(self.kind));
        }
        Ok(captures.into_iter().collect())
    }
}

/// CRLF -> LF et blancs finaux retirés, des deux côtés (gabarit et texte)
fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim_end().to_string()
}

fn match_segments(segments: &[Segment], text: &str, captures: &mut Vec<(Field, String)>) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return text.is_empty();
    };

    match first {
        Segment::Literal(lit) => match text.strip_prefix(lit.as_str()) {
            Some(tail) => match_segments(rest, tail, captures),
            None => false,
        },
        Segment::Field(field) => match rest.first() {
            None => {
                captures.push((*field, text.to_string()));
                true
            }
            Some(Segment::Literal(next)) => {
                for (idx, _) in text.match_indices(next.as_str()) {
                    let mark = captures.len();
                    captures.push((*field, text[..idx].to_string()));
                    if match_segments(rest, &text[idx..], captures) {
                        return true;
                    }
                    captures.truncate(mark);
                }
                false
            }
            // refusé à la compilation
            Some(Segment::Field(_)) => false,
        },
    }
}

/// Jeu complet des gabarits utilisés par le moteur
#[derive(Debug, Clone)]
pub struct Templates {
    summary: Template,
    description: Template,
    note: Template,
    close: Template,
}

impl Templates {
    pub fn compile(summary: &str, description: &str, note: &str, close: &str) -> Result<Self, TemplateError> {
        let templates = Self {
            summary: Template::compile(TemplateKind::Summary, summary)?,
            description: Template::compile(TemplateKind::Description, description)?,
            note: Template::compile(TemplateKind::Note, note)?,
            close: Template::compile(TemplateKind::Close, close)?,
        };

        // description et note sont relues pour reconstruire les paquets déjà notifiés
        for template in [&templates.description, &templates.note] {
            if !template.has_field(Field::Packages) {
                return Err(TemplateError::MissingField {
                    kind: template.kind,
                    field: Field::Packages.name(),
                });
            }
        }
        Ok(templates)
    }

    pub fn get(&self, kind: TemplateKind) -> &Template {
        match kind {
            TemplateKind::Summary => &self.summary,
            TemplateKind::Description => &self.description,
            TemplateKind::Note => &self.note,
            TemplateKind::Close => &self.close,
        }
    }

    pub fn render(&self, kind: TemplateKind, fields: &TemplateFields) -> String {
        self.get(kind).render(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplatesConf;

    fn defaults() -> Templates {
        TemplatesConf::default().compile().unwrap()
    }

    #[test]
    fn test_render_default_messages() {
        let templates = defaults();
        let fields = TemplateFields::new("localhost")
            .packages(&["python-django", "python-soappy"])
            .all_packages(&["python-django", "python-soappy"]);

        assert_eq!(
            templates.render(TemplateKind::Summary, &fields),
            "Security updates available for host localhost : python-django python-soappy"
        );
        assert_eq!(
            templates.render(TemplateKind::Description, &fields),
            "The following packages have security updates available : python-django python-soappy"
        );
        assert_eq!(
            templates.render(TemplateKind::Note, &TemplateFields::new("h").packages(&["python-soappy"])),
            "This packages also have security updates : python-soappy"
        );
        assert_eq!(
            templates.render(
                TemplateKind::Close,
                &TemplateFields::new("localhost").all_packages(&["python-django"])
            ),
            "No more security update for this host.\nThe packages that have been updated are : python-django"
        );
    }

    #[test]
    fn test_extract_round_trip() {
        let templates = defaults();
        let packages = ["libssl", "curl", "openssh"];
        for kind in [TemplateKind::Description, TemplateKind::Note] {
            let rendered = templates.render(kind, &TemplateFields::new("db1").packages(&packages));
            let fields = templates.get(kind).extract(&rendered).unwrap();
            assert_eq!(fields[&Field::Packages], "libssl curl openssh");
        }
    }

    #[test]
    fn test_extract_summary_fields() {
        let template = defaults();
        let fields = template
            .get(TemplateKind::Summary)
            .extract("Security updates available for host web : 1 : curl")
            .unwrap();
        assert_eq!(fields[&Field::HostName], "web");
        assert_eq!(fields[&Field::AllPackages], "1 : curl");
    }

    #[test]
    fn test_extract_backtracks_on_repeated_literal() {
        let template = Template::compile(TemplateKind::Note, "pkgs {packages} end").unwrap();
        let fields = template.extract("pkgs a end b end").unwrap();
        assert_eq!(fields[&Field::Packages], "a end b");

        let template = Template::compile(TemplateKind::Note, "pkgs: {packages} (host {host_name})").unwrap();
        let fields = template.extract("pkgs: a (b) c (host web1)").unwrap();
        assert_eq!(fields[&Field::Packages], "a (b) c");
        assert_eq!(fields[&Field::HostName], "web1");
    }

    #[test]
    fn test_extract_tolerates_crlf_and_trailing_blanks() {
        let templates = defaults();
        let text = "No more security update for this host.\r\nThe packages that have been updated are : curl  \r\n";
        let fields = templates.get(TemplateKind::Close).extract(text).unwrap();
        assert_eq!(fields[&Field::AllPackages], "curl");
    }

    #[test]
    fn test_extract_mismatch() {
        let templates = defaults();
        let err = templates
            .get(TemplateKind::Note)
            .extract("Rebooted the host, will check tomorrow")
            .unwrap_err();
        assert!(matches!(err, ParseError::TemplateMismatch(TemplateKind::Note)));
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            Template::compile(TemplateKind::Summary, "host {hostname}"),
            Err(TemplateError::UnknownField { .. })
        ));
        assert!(matches!(
            Template::compile(TemplateKind::Summary, "host {host_name"),
            Err(TemplateError::Unclosed { .. })
        ));
        assert!(matches!(
            Template::compile(TemplateKind::Summary, "{host_name}{packages}"),
            Err(TemplateError::AdjacentFields { .. })
        ));
        assert!(matches!(
            Templates::compile("{host_name}", "no packages here", "{packages}", "bye"),
            Err(TemplateError::MissingField { kind: TemplateKind::Description, .. })
        ));
    }
}
