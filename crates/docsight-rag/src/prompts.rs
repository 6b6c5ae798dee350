//! Prompt templates
//!
//! Placeholders are `{name}`; substitution is a single pass, so braces in
//! document text or in the JSON skeletons are never re-expanded.

use std::str::FromStr;

const QA_TEMPLATE: &str = "You are an expert document analyst. Use the provided context to answer the question accurately and thoroughly.
If the context doesn't contain enough information, say so honestly.

CONTEXT:
{context}

QUESTION: {question}

ANSWER:";

const SUMMARY_TEMPLATE: &str = r#"You are an expert document summarizer. Analyze the following document text and provide a comprehensive summary.

DOCUMENT TEXT:
{text}

Provide your response as a JSON object with these exact keys:
{
    "executive_summary": "A 2-3 paragraph executive summary",
    "section_summaries": [
        {"title": "Section title", "summary": "Section summary"}
    ],
    "bullet_highlights": ["Key highlight 1", "Key highlight 2"],
    "key_takeaways": ["Takeaway 1", "Takeaway 2"]
}

JSON RESPONSE:"#;

const RISK_TEMPLATE: &str = r#"Analyze this document for potential risks, compliance issues, and concerning language.

DOCUMENT TEXT:
{text}

Identify and categorize all risks. Return as JSON:
{
    "overall_risk_score": "Low|Medium|High",
    "risk_items": [
        {
            "risk_type": "Compliance|Financial|Legal|Operational|Reputational",
            "severity": "Low|Medium|High",
            "description": "Brief description of the risk",
            "highlighted_text": "Exact quote from document",
            "recommendation": "Suggested mitigation"
        }
    ],
    "total_risks": 0
}

JSON RESPONSE:"#;

const COMPARISON_TEMPLATE: &str = r#"Compare the following documents and identify similarities and differences.

{documents}

Provide a structured comparison as JSON:
{
    "summary": "Overall comparison summary",
    "similarities": ["Similarity 1", "Similarity 2"],
    "differences": [
        {
            "category": "Category name",
            "document_a": "What Document A says",
            "document_b": "What Document B says",
            "detail": "Detailed explanation"
        }
    ]
}

JSON RESPONSE:"#;

const EXTRACTION_LEGAL_TEMPLATE: &str = r#"Analyze this legal document and extract key information.

DOCUMENT TEXT:
{text}

Extract and return as JSON:
{
    "parties": ["Party names involved"],
    "effective_date": "Contract effective date",
    "termination_date": "Contract end date",
    "key_terms": ["Important terms and conditions"],
    "obligations": ["Key obligations for each party"],
    "penalties": ["Penalty clauses"],
    "governing_law": "Applicable law/jurisdiction",
    "special_clauses": ["Notable or unusual clauses"]
}

JSON RESPONSE:"#;

const EXTRACTION_FINANCIAL_TEMPLATE: &str = r#"Analyze this financial document and extract key metrics.

DOCUMENT TEXT:
{text}

Extract and return as JSON:
{
    "revenue": "Total revenue figure",
    "expenses": "Total expenses",
    "net_income": "Net income/loss",
    "key_ratios": {"ratio_name": "value"},
    "trends": ["Notable financial trends"],
    "risks": ["Financial risk factors"],
    "outlook": "Future outlook"
}

JSON RESPONSE:"#;

const EXTRACTION_RESEARCH_TEMPLATE: &str = r#"Analyze this research paper and extract key information.

DOCUMENT TEXT:
{text}

Extract and return as JSON:
{
    "methodology": "Research methodology description",
    "key_contributions": ["Main contributions"],
    "findings": ["Key findings"],
    "limitations": ["Study limitations"],
    "future_work": ["Suggested future directions"],
    "citations_count": "Number of references"
}

JSON RESPONSE:"#;

const EXTRACTION_GENERAL_TEMPLATE: &str = r#"Analyze this document and extract key information.

DOCUMENT TEXT:
{text}

Extract and return as JSON:
{
    "main_topics": ["Primary topics covered"],
    "key_points": ["Important points"],
    "action_items": ["Action items if any"],
    "references": ["Notable references or citations"]
}

JSON RESPONSE:"#;

/// Extraction flavour; unknown names map to `General`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionKind {
    Legal,
    Financial,
    Research,
    #[default]
    General,
}

impl FromStr for ExtractionKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "legal" => Self::Legal,
            "financial" => Self::Financial,
            "research" => Self::Research,
            _ => Self::General,
        })
    }
}

impl ExtractionKind {
    fn template(self) -> &'static str {
        match self {
            Self::Legal => EXTRACTION_LEGAL_TEMPLATE,
            Self::Financial => EXTRACTION_FINANCIAL_TEMPLATE,
            Self::Research => EXTRACTION_RESEARCH_TEMPLATE,
            Self::General => EXTRACTION_GENERAL_TEMPLATE,
        }
    }
}

/// Substitute `{name}` placeholders in one pass
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let extra: usize = vars.iter().map(|(_, value)| value.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let matched = vars.iter().find(|(name, _)| {
            tail.starts_with(name) && tail[name.len()..].starts_with('}')
        });
        match matched {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn qa_prompt(context: &str, question: &str) -> String {
    render(QA_TEMPLATE, &[("context", context), ("question", question)])
}

pub fn summary_prompt(text: &str) -> String {
    render(SUMMARY_TEMPLATE, &[("text", text)])
}

pub fn risk_prompt(text: &str) -> String {
    render(RISK_TEMPLATE, &[("text", text)])
}

pub fn comparison_prompt(documents: &str) -> String {
    render(COMPARISON_TEMPLATE, &[("documents", documents)])
}

pub fn extraction_prompt(kind: ExtractionKind, text: &str) -> String {
    render(kind.template(), &[("text", text)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_single_pass() {
        let out = render("{a} and {b}", &[("a", "{b}"), ("b", "two")]);
        assert_eq!(out, "{b} and two");
    }

    #[test]
    fn test_render_keeps_unknown_braces() {
        let out = render("{\"k\": {x}} {", &[("x", "1")]);
        assert_eq!(out, "{\"k\": 1} {");
    }

    #[test]
    fn test_qa_prompt() {
        let prompt = qa_prompt("[Chunk 1]: Fees are $10.", "What are the fees?");
        assert!(prompt.contains("CONTEXT:\n[Chunk 1]: Fees are $10."));
        assert!(prompt.contains("QUESTION: What are the fees?"));
        assert!(prompt.ends_with("ANSWER:"));
    }

    #[test]
    fn test_summary_prompt_keeps_json_skeleton() {
        let prompt = summary_prompt("Body");
        assert!(prompt.contains("\"executive_summary\""));
        assert!(prompt.contains("{\"title\": \"Section title\""));
        assert!(prompt.contains("DOCUMENT TEXT:\nBody"));
    }

    #[test]
    fn test_extraction_kind_parse() {
        assert_eq!("Legal".parse::<ExtractionKind>(), Ok(ExtractionKind::Legal));
        assert_eq!("poetry".parse::<ExtractionKind>(), Ok(ExtractionKind::General));
        assert!(extraction_prompt(ExtractionKind::Financial, "x").contains("net_income"));
    }
}
