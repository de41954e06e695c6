use crate::extract::{ExtractionStrategy, PageSnapshot, RawJobNode, first_match, parse_selectors};
use crate::text::{collapse_whitespace, element_visible_text, truncate_chars};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value, json};
use url::Url;

/// Card selectors, most specific first
const CARD_SELECTORS: &[&str] = &[
    r#"article[data-test="JobTile"]"#,
    r#"[data-test="job-tile"]"#,
    r#"[data-test="JobTile"]"#,
    "article.job-tile",
    r#"section[class*="job-tile"]"#,
    r#"[class*="JobSearchCard"]"#,
    "article",
];

/// A selector matching more cards than this is matching page chrome
const MAX_CARDS: usize = 200;

const TITLE_SELECTORS: &[&str] = &[
    r#"[data-test="job-tile-title-link"]"#,
    r#"[data-test="job-title"]"#,
    "h2 a",
    "h3 a",
    r#"[class*="job-title"]"#,
    r#"a[class*="title"]"#,
    "h2",
    "h3",
];

const LINK_SELECTORS: &[&str] = &[r#"a[href*="/jobs/"]"#, r#"a[href*="/job/"]"#];

const DESCRIPTION_SELECTORS: &[&str] = &[
    r#"[data-test="job-description-text"]"#,
    r#"[data-test="job-description"]"#,
    r#"[class*="description"]"#,
    r#"p[class*="text"]"#,
];

const BUDGET_SELECTORS: &[&str] = &[
    r#"[data-test="budget"]"#,
    r#"[data-test="is-fixed-price"]"#,
    r#"[class*="budget"]"#,
    r#"[class*="rate"]"#,
];

const EXPERIENCE_SELECTORS: &[&str] = &[
    r#"[data-test="experience-level"]"#,
    r#"[data-test="contractor-tier"]"#,
    r#"[data-test="experience"]"#,
    r#"[class*="experience"]"#,
];

const JOB_TYPE_SELECTORS: &[&str] = &[
    r#"[data-test="job-type-label"]"#,
    r#"[data-test="job-type"]"#,
    r#"[class*="job-type"]"#,
];

const SKILL_SELECTORS: &[&str] = &[
    r#"[data-test="token"]"#,
    r#"[data-test="attr-item"]"#,
    r#"a[class*="skill"]"#,
    r#"[class*="skill"]"#,
    r#"span[class*="tag"]"#,
];

const POSTED_SELECTORS: &[&str] = &[
    r#"[data-test="job-pubilshed-date"]"#,
    r#"[data-test="posted-on"]"#,
    "time",
    r#"[class*="posted"]"#,
];

const DURATION_SELECTORS: &[&str] = &[
    r#"[data-test="duration-label"]"#,
    r#"[data-test="duration"]"#,
    r#"[class*="duration"]"#,
];

const CLIENT_SELECTORS: &[&str] = &[
    r#"[data-test="client-info"]"#,
    r#"[data-test="client"]"#,
    r#"[class*="client"]"#,
];

const CLIENT_LOCATION_SELECTORS: &[&str] = &[
    r#"[data-test="client-country"]"#,
    r#"[data-test="location"]"#,
    r#"[class*="location"]"#,
];

const CLIENT_SPENT_SELECTORS: &[&str] = &[r#"[data-test="total-spent"]"#, r#"[class*="spent"]"#];

const CLIENT_RATING_SELECTORS: &[&str] = &[
    r#"[data-test="total-feedback"]"#,
    r#"[class*="rating"]"#,
];

const PROPOSAL_SELECTORS: &[&str] = &[
    r#"[data-test="proposals-tier"]"#,
    r#"[data-test="proposals"]"#,
    r#"[class*="proposal"]"#,
];

const MAX_SKILLS: usize = 10;
const MAX_DESCRIPTION_CHARS: usize = 500;

/// Reads job cards from the rendered markup
pub struct DomHeuristicStrategy;

/// Compiled selectors for every card field
struct FieldSelectors {
    title: Vec<Selector>,
    link: Vec<Selector>,
    description: Vec<Selector>,
    budget: Vec<Selector>,
    experience: Vec<Selector>,
    job_type: Vec<Selector>,
    skills: Vec<Selector>,
    posted: Vec<Selector>,
    duration: Vec<Selector>,
    client: Vec<Selector>,
    client_location: Vec<Selector>,
    client_spent: Vec<Selector>,
    client_rating: Vec<Selector>,
    proposals: Vec<Selector>,
    id_patterns: Vec<Regex>,
    digits: Option<Regex>,
    spent: Option<Regex>,
    rating: Option<Regex>,
}

impl FieldSelectors {
    fn new() -> Self {
        Self {
            title: parse_selectors(TITLE_SELECTORS),
            link: parse_selectors(LINK_SELECTORS),
            description: parse_selectors(DESCRIPTION_SELECTORS),
            budget: parse_selectors(BUDGET_SELECTORS),
            experience: parse_selectors(EXPERIENCE_SELECTORS),
            job_type: parse_selectors(JOB_TYPE_SELECTORS),
            skills: parse_selectors(SKILL_SELECTORS),
            posted: parse_selectors(POSTED_SELECTORS),
            duration: parse_selectors(DURATION_SELECTORS),
            client: parse_selectors(CLIENT_SELECTORS),
            client_location: parse_selectors(CLIENT_LOCATION_SELECTORS),
            client_spent: parse_selectors(CLIENT_SPENT_SELECTORS),
            client_rating: parse_selectors(CLIENT_RATING_SELECTORS),
            proposals: parse_selectors(PROPOSAL_SELECTORS),
            id_patterns: [r"~([0-9A-Za-z]+)", r"/jobs?/([^/?#]+)"]
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            digits: Regex::new(r"\d+").ok(),
            spent: Regex::new(r"(\$[\d.,]+[KkMm]?\+?)\s*spent").ok(),
            rating: Regex::new(r"\d+(\.\d+)?").ok(),
        }
    }
}

impl ExtractionStrategy for DomHeuristicStrategy {
    fn name(&self) -> &'static str {
        "dom-heuristic"
    }

    fn extract(&self, page: &PageSnapshot) -> Vec<RawJobNode> {
        let doc = Html::parse_document(&page.html);
        let Some(cards) = select_cards(&doc) else {
            return Vec::new();
        };
        let fields = FieldSelectors::new();
        let base = Url::parse(&page.url).ok();

        cards
            .into_iter()
            .filter_map(|card| read_card(card, &fields, base.as_ref()))
            .map(RawJobNode::new)
            .collect()
    }
}

/// First card selector that matches a plausible number of elements
fn select_cards(doc: &Html) -> Option<Vec<ElementRef<'_>>> {
    for (selector, source) in parse_selectors(CARD_SELECTORS).iter().zip(CARD_SELECTORS) {
        let cards = doc.select(selector).collect::<Vec<_>>();
        if cards.is_empty() {
            continue;
        }
        if cards.len() > MAX_CARDS {
            ::log::debug!("Card selector {} matched {} elements, skipping", source, cards.len());
            continue;
        }
        ::log::debug!("Card selector {} matched {} cards", source, cards.len());
        return Some(cards);
    }
    None
}

/// Builds a raw node from one card; `None` when no title resolves
fn read_card(card: ElementRef<'_>, fields: &FieldSelectors, base: Option<&Url>) -> Option<Value> {
    let title_el = first_text_element(card, &fields.title)?;
    let title = element_visible_text(title_el);

    let href = first_match(card, &fields.link)
        .and_then(|a| a.value().attr("href"))
        .or_else(|| title_el.value().attr("href"))
        .or_else(|| {
            Selector::parse("a[href]")
                .ok()
                .and_then(|a| title_el.select(&a).next())
                .and_then(|a| a.value().attr("href"))
        });
    let url = href.map(|h| match base.and_then(|b| b.join(h).ok()) {
        Some(resolved) => resolved.to_string(),
        None => h.to_string(),
    });
    let job_id = href.and_then(|h| {
        fields
            .id_patterns
            .iter()
            .find_map(|re| re.captures(h).and_then(|c| c.get(1)))
            .map(|m| m.as_str().to_string())
    });

    let mut node = Map::new();
    if let Some(id) = &job_id {
        let ciphertext = if id.starts_with('~') {
            id.clone()
        } else if href.is_some_and(|h| h.contains(&format!("~{}", id))) {
            format!("~{}", id)
        } else {
            id.clone()
        };
        node.insert("id".into(), json!(id));
        node.insert("ciphertext".into(), json!(ciphertext));
    }
    node.insert("title".into(), json!(title));
    if let Some(url) = url {
        node.insert("url".into(), json!(url));
    }

    if let Some(description) = first_text(card, &fields.description) {
        node.insert(
            "description".into(),
            json!(truncate_chars(&description, MAX_DESCRIPTION_CHARS)),
        );
    }

    if let Some(budget) = first_text(card, &fields.budget) {
        let lower = budget.to_lowercase();
        if lower.contains("hourly") || lower.contains("/hr") {
            node.insert("hourlyBudgetText".into(), json!(budget));
        } else {
            node.insert("budget".into(), json!(budget));
        }
    }

    if let Some(tier) = first_text(card, &fields.experience) {
        node.insert("experienceLevel".into(), json!(tier));
    }
    if let Some(kind) = first_text(card, &fields.job_type) {
        node.insert("type".into(), json!(kind));
    }

    let skills = all_texts(card, &fields.skills, MAX_SKILLS);
    if !skills.is_empty() {
        let skills = skills
            .into_iter()
            .map(|s| json!({ "prettyName": s }))
            .collect::<Vec<_>>();
        node.insert("skills".into(), Value::Array(skills));
    }

    if let Some(posted) = first_match(card, &fields.posted) {
        let text = element_visible_text(posted);
        let posted = if text.is_empty() {
            posted.value().attr("datetime").map(str::to_string)
        } else {
            Some(text)
        };
        if let Some(posted) = posted {
            node.insert("createdOn".into(), json!(posted));
        }
    }

    if let Some(duration) = first_text(card, &fields.duration) {
        node.insert("duration".into(), json!(duration));
    }

    if let Some(proposals) = first_text(card, &fields.proposals) {
        let count = fields
            .digits
            .as_ref()
            .and_then(|re| re.find(&proposals))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0);
        node.insert("totalApplicants".into(), json!(count));
    }

    if let Some(client) = read_client(card, fields) {
        node.insert("client".into(), client);
    }

    Some(Value::Object(node))
}

/// Client block: free text plus whatever structured bits can be picked out
fn read_client(card: ElementRef<'_>, fields: &FieldSelectors) -> Option<Value> {
    let client_el = first_text_element(card, &fields.client);
    let info = client_el.map(element_visible_text);
    let scope = client_el.unwrap_or(card);

    let mut client = Map::new();
    if let Some(info) = &info {
        client.insert("info".into(), json!(info));
        let lower = info.to_lowercase();
        if lower.contains("payment verified") && !lower.contains("unverified") {
            client.insert("paymentVerificationStatus".into(), json!(1));
        }
        if let Some(spent) = fields
            .spent
            .as_ref()
            .and_then(|re| re.captures(info))
            .and_then(|c| c.get(1))
        {
            client.insert("totalSpent".into(), json!({ "amount": spent.as_str() }));
        }
    }

    if let Some(country) = first_text(scope, &fields.client_location) {
        client.insert("location".into(), json!({ "country": country }));
    }
    if !client.contains_key("totalSpent") {
        if let Some(spent) = first_text(scope, &fields.client_spent) {
            let amount = spent.trim_end_matches("spent").trim().to_string();
            client.insert("totalSpent".into(), json!({ "amount": amount }));
        }
    }
    if let Some(rating) = first_text(scope, &fields.client_rating)
        .and_then(|r| fields.rating.as_ref()?.find(&r).map(|m| m.as_str().to_string()))
        .and_then(|r| r.parse::<f64>().ok())
    {
        client.insert("totalFeedback".into(), json!(rating));
    }

    if client.is_empty() {
        None
    } else {
        Some(Value::Object(client))
    }
}

/// First element, by selector priority, whose visible text is nonempty
fn first_text_element<'a>(root: ElementRef<'a>, selectors: &[Selector]) -> Option<ElementRef<'a>> {
    selectors.iter().find_map(|s| {
        root.select(s)
            .find(|el| !element_visible_text(*el).is_empty())
    })
}

fn first_text(root: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    first_text_element(root, selectors).map(element_visible_text)
}

/// Nonempty texts from the first selector that yields any, capped at `limit`
fn all_texts(root: ElementRef<'_>, selectors: &[Selector], limit: usize) -> Vec<String> {
    for selector in selectors {
        let texts = root
            .select(selector)
            .map(|el| collapse_whitespace(&element_visible_text(el)))
            .filter(|t| !t.is_empty())
            .take(limit)
            .collect::<Vec<_>>();
        if !texts.is_empty() {
            return texts;
        }
    }
    Vec::new()
}
