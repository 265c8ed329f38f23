//! Product knowledge lookup.
//!
//! Resolves a free-text product query in up to three tiers, stopping at the
//! first that yields a usable record:
//!
//! 1. the product database search endpoint (proxy URL first, then direct)
//! 2. a generative fallback asked for a fixed JSON shape
//! 3. a not-found result explaining that values must be estimated
//!
//! Database hits are re-ranked locally: the endpoint's own relevance order is
//! often dominated by popular products that share a single word with the query.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::LookupConfig;
use crate::error::{ChatError, ChatResult};
use crate::llm::{GenerationRequest, Generator, Turn};

/// Function words and unit words that never identify a product.
const STOP_WORDS: &[&str] = &[
    // German
    "und", "mit", "ohne", "der", "die", "das", "den", "dem", "des", "ein", "eine", "einen",
    "einem", "einer", "von", "vom", "zum", "zur", "auf", "aus", "fur", "im", "in", "am", "an",
    "bei", "oder", "je", "pro", "ca", "etwa", "stuck", "stk", "packung", "portion", "portionen",
    "scheibe", "scheiben", "becher", "glas", "flasche", "dose", "el", "tl", "prise",
    // English
    "and", "with", "without", "the", "a", "an", "of", "for", "from", "to", "on", "or", "per",
    "about", "piece", "pieces", "pack", "serving", "servings", "slice", "slices", "cup", "cups",
    "bottle", "can", "tbsp", "tsp",
    // Units
    "g", "gr", "gramm", "gram", "grams", "kg", "mg", "ml", "l", "liter", "litre", "kcal", "kj",
    "oz", "lb", "x",
];

/// Lowercase, transliterate and tokenize a query, dropping stop words and
/// pure quantities such as "500g" or "2".
pub fn normalize_query(text: &str) -> Vec<String> {
    fold(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| !STOP_WORDS.contains(t))
        .filter(|t| !is_quantity(t))
        .map(str::to_string)
        .collect()
}

/// NFD with combining marks removed, so ö becomes o and é becomes e.
fn fold(text: &str) -> String {
    text.to_lowercase()
        .replace('ß', "ss")
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

fn is_quantity(token: &str) -> bool {
    let digits = token.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && token.len() - digits <= 3 && token[digits..].chars().all(|c| c.is_ascii_alphabetic())
}

/// Whether a query token matches a candidate token exactly or by stem.
pub fn tokens_match(query: &str, candidate: &str) -> bool {
    if query == candidate {
        return true;
    }
    let (q, c) = (query.chars().count(), candidate.chars().count());
    if q < 4 || c < 4 {
        return false;
    }
    if query.starts_with(candidate) || candidate.starts_with(query) {
        return true;
    }
    q >= 5 && c >= 5 && query.chars().take(5).eq(candidate.chars().take(5))
}

/// Minimum number of matched query tokens a hit needs.
pub fn required_score(query_tokens: usize) -> usize {
    match query_tokens {
        0 => usize::MAX,
        1 => 1,
        n => n.div_ceil(2).max(2),
    }
}

/// Number of query tokens that match any candidate token.
pub fn score_hit(query_tokens: &[String], hit: &ProductHit) -> usize {
    let candidate = normalize_query(&format!("{} {}", hit.name, hit.brand.as_deref().unwrap_or("")));
    query_tokens
        .iter()
        .filter(|q| candidate.iter().any(|c| tokens_match(q, c)))
        .count()
}

/// Index of the best-scoring hit that clears the minimum score.
///
/// Hits without per-100 energy are skipped. Ties keep the endpoint's order.
pub fn select_best(query_tokens: &[String], hits: &[ProductHit]) -> Option<usize> {
    let required = required_score(query_tokens.len());
    let mut best: Option<(usize, usize)> = None;

    for (index, hit) in hits.iter().enumerate() {
        if hit.energy_kcal_100g.is_none() {
            continue;
        }
        let score = score_hit(query_tokens, hit);
        debug!("Lookup candidate #{} '{}' scored {}", index, hit.name, score);
        if score >= required && best.map_or(true, |(_, s)| score > s) {
            best = Some((index, score));
        }
    }

    best.map(|(index, _)| index)
}

/// A product as returned by the search endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductHit {
    pub name: String,
    pub brand: Option<String>,
    pub energy_kcal_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub fat_100g: Option<f64>,
    /// Serving size as printed, e.g. "40 g"
    pub serving_size: Option<String>,
    /// Serving quantity in grams or millilitres
    pub serving_quantity: Option<f64>,
}

impl ProductHit {
    /// Parse one element of the endpoint's `products` or `hits` array.
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value["product_name"]
            .as_str()
            .or_else(|| value["product_name_de"].as_str())
            .or_else(|| value["product_name_en"].as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();
        let brand = match &value["brands"] {
            Value::String(s) => s.split(',').next().map(|b| b.trim().to_string()),
            Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
        .filter(|b| !b.is_empty());

        let nutriments = &value["nutriments"];
        Some(Self {
            name,
            brand,
            energy_kcal_100g: number(&nutriments["energy-kcal_100g"]),
            proteins_100g: number(&nutriments["proteins_100g"]),
            carbohydrates_100g: number(&nutriments["carbohydrates_100g"]),
            fat_100g: number(&nutriments["fat_100g"]),
            serving_size: value["serving_size"].as_str().map(str::to_string),
            serving_quantity: number(&value["serving_quantity"]),
        })
    }
}

/// Parse the product list out of an endpoint response body.
pub fn parse_hits(body: &Value) -> Vec<ProductHit> {
    body.get("products")
        .or_else(|| body.get("hits"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(ProductHit::from_value).collect())
        .unwrap_or_default()
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// Macros for a reference amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl Macros {
    fn scaled(&self, amount: f64) -> Self {
        let factor = amount / 100.0;
        Self {
            calories: (self.calories * factor).round(),
            protein: round1(self.protein * factor),
            carbs: round1(self.carbs * factor),
            fat: round1(self.fat * factor),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Normalized product record produced by every successful tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: String,
    pub brand: Option<String>,
    pub per_100: Macros,
    pub per_serving: Option<Macros>,
    pub serving_size: Option<f64>,
    pub serving_unit: String,
}

impl ProductRecord {
    fn from_hit(hit: &ProductHit, amount: Option<f64>) -> Self {
        let per_100 = Macros {
            calories: hit.energy_kcal_100g.unwrap_or(0.0),
            protein: hit.proteins_100g.unwrap_or(0.0),
            carbs: hit.carbohydrates_100g.unwrap_or(0.0),
            fat: hit.fat_100g.unwrap_or(0.0),
        };
        let unit = match hit.serving_size.as_deref() {
            Some(s) if s.to_lowercase().contains("ml") => "ml",
            _ => "g",
        };
        Self::new(hit.name.clone(), hit.brand.clone(), per_100, amount.or(hit.serving_quantity), unit)
    }

    fn new(name: String, brand: Option<String>, per_100: Macros, serving: Option<f64>, unit: &str) -> Self {
        let serving = serving.filter(|s| *s > 0.0);
        Self {
            name,
            brand,
            per_serving: serving.map(|s| per_100.scaled(s)),
            per_100,
            serving_size: serving,
            serving_unit: unit.to_string(),
        }
    }

    /// Sentence listing name, brand, per-100 and per-serving values.
    pub fn summary(&self) -> String {
        let brand = self
            .brand
            .as_deref()
            .map(|b| format!(" ({})", b))
            .unwrap_or_default();
        let mut text = format!(
            "{}{}: per 100 {}: {:.0} kcal, {} g protein, {} g carbs, {} g fat.",
            self.name,
            brand,
            self.serving_unit,
            self.per_100.calories,
            round1(self.per_100.protein),
            round1(self.per_100.carbs),
            round1(self.per_100.fat)
        );
        if let (Some(size), Some(serving)) = (self.serving_size, self.per_serving) {
            text.push_str(&format!(
                " Per serving ({} {}): {:.0} kcal, {} g protein, {} g carbs, {} g fat.",
                size, self.serving_unit, serving.calories, serving.protein, serving.carbs, serving.fat
            ));
        }
        text
    }
}

/// Tier that produced a lookup result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    PrimaryDatabase,
    FallbackSearch,
    None,
}

/// Outcome of a lookup, ready for re-injection into a generator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    pub found: bool,
    pub source: LookupSource,
    pub product: Option<ProductRecord>,
    pub summary: String,
}

impl LookupResult {
    fn found(source: LookupSource, product: ProductRecord) -> Self {
        let origin = match source {
            LookupSource::PrimaryDatabase => "Product database",
            _ => "Estimated from general knowledge",
        };
        Self {
            found: true,
            source,
            summary: format!("{}: {}", origin, product.summary()),
            product: Some(product),
        }
    }

    fn not_found(query: &str) -> Self {
        Self {
            found: false,
            source: LookupSource::None,
            product: None,
            summary: format!(
                "No product data found for \"{}\". Estimate typical values and tell the user they are estimates.",
                query.trim()
            ),
        }
    }
}

/// A searchable product database.
#[async_trait]
pub trait ProductSource: Send + Sync {
    /// Hits in the database's own relevance order.
    async fn search(&self, query: &str) -> ChatResult<Vec<ProductHit>>;
}

/// Product database reached over HTTP, with an optional proxy in front.
pub struct HttpProductSource {
    client: reqwest::Client,
    config: LookupConfig,
}

impl HttpProductSource {
    pub fn new(config: LookupConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn urls(&self) -> Vec<&str> {
        self.config
            .proxy_url
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.config.direct_url.as_str()))
            .collect()
    }

    async fn fetch(&self, url: &str, query: &str) -> ChatResult<Vec<ProductHit>> {
        let page_size = self.config.page_size.to_string();
        let response = self
            .client
            .get(url)
            .query(&[
                ("search_terms", query),
                ("page_size", page_size.as_str()),
                ("lc", self.config.locale.as_str()),
                ("json", "1"),
            ])
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| ChatError::Lookup(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Lookup(format!("{} returned {}", url, status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.contains("json") {
            return Err(ChatError::Lookup(format!(
                "{} returned non-JSON content ({})",
                url, content_type
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Lookup(format!("invalid JSON from {}: {}", url, e)))?;
        Ok(parse_hits(&body))
    }
}

#[async_trait]
impl ProductSource for HttpProductSource {
    async fn search(&self, query: &str) -> ChatResult<Vec<ProductHit>> {
        let mut last_error = None;
        for url in self.urls() {
            match self.fetch(url, query).await {
                Ok(hits) => {
                    debug!("{} returned {} hit(s)", url, hits.len());
                    return Ok(hits);
                }
                Err(e) => {
                    warn!("Product search attempt failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ChatError::Lookup("no endpoint configured".to_string())))
    }
}

const FALLBACK_INSTRUCTION: &str = r#"You are a food database. Reply with one JSON object and nothing else, in this exact shape:
{"found": true, "name": "...", "brand": "..." or null, "calories_per_100": 0, "protein_per_100": 0, "carbs_per_100": 0, "fat_per_100": 0, "serving_size": 0 or null, "serving_unit": "g" or "ml"}
All values refer to 100 g (or 100 ml). If you do not know the product, reply {"found": false}."#;

/// Three-tier product resolver.
pub struct KnowledgeLookup {
    source: Arc<dyn ProductSource>,
    fallback: Option<Arc<dyn Generator>>,
    fallback_timeout: Duration,
}

impl KnowledgeLookup {
    pub fn new(source: Arc<dyn ProductSource>) -> Self {
        Self {
            source,
            fallback: None,
            fallback_timeout: Duration::from_secs(20),
        }
    }

    /// HTTP-backed lookup built from configuration.
    pub fn from_config(config: &LookupConfig, fallback: Option<Arc<dyn Generator>>) -> Self {
        let mut lookup = Self::new(Arc::new(HttpProductSource::new(config.clone())));
        lookup.fallback_timeout = Duration::from_secs(config.fallback_timeout_secs);
        if config.fallback_enabled {
            lookup.fallback = fallback;
        }
        lookup
    }

    pub fn with_fallback(mut self, generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        self.fallback = Some(generator);
        self.fallback_timeout = timeout;
        self
    }

    pub async fn resolve(&self, query: &str) -> LookupResult {
        self.resolve_amount(query, None).await
    }

    /// Resolve a query; `amount` (g or ml) overrides the product's serving size.
    pub async fn resolve_amount(&self, query: &str, amount: Option<f64>) -> LookupResult {
        let tokens = normalize_query(query);

        if tokens.is_empty() {
            debug!("Query '{}' has no searchable tokens", query);
        } else {
            let terms = tokens.join(" ");
            match self.source.search(&terms).await {
                Ok(hits) => {
                    if let Some(index) = select_best(&tokens, &hits) {
                        info!("Lookup '{}' resolved from product database", query);
                        let record = ProductRecord::from_hit(&hits[index], amount);
                        return LookupResult::found(LookupSource::PrimaryDatabase, record);
                    }
                    debug!("No database hit cleared the minimum score for '{}'", query);
                }
                Err(e) => warn!("Product database unavailable: {}", e),
            }
        }

        if let Some(record) = self.ask_fallback(query, amount).await {
            info!("Lookup '{}' resolved by generative fallback", query);
            return LookupResult::found(LookupSource::FallbackSearch, record);
        }

        info!("Lookup '{}' found nothing", query);
        LookupResult::not_found(query)
    }

    async fn ask_fallback(&self, query: &str, amount: Option<f64>) -> Option<ProductRecord> {
        let generator = self.fallback.as_ref()?;
        let request = GenerationRequest {
            system: FALLBACK_INSTRUCTION.to_string(),
            turns: vec![Turn::user(query.trim())],
            max_tokens: 400,
        };

        let generation = match tokio::time::timeout(self.fallback_timeout, generator.complete(&request)).await {
            Ok(Ok(generation)) => generation,
            Ok(Err(e)) => {
                warn!("Lookup fallback failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!("Lookup fallback timed out after {:?}", self.fallback_timeout);
                return None;
            }
        };

        let value = first_json_object(&generation.content)?;
        record_from_fallback(&value, query, amount)
    }
}

fn record_from_fallback(value: &Value, query: &str, amount: Option<f64>) -> Option<ProductRecord> {
    if value["found"] == Value::Bool(false) {
        return None;
    }
    let calories = number(&value["calories_per_100"])?;
    let per_100 = Macros {
        calories,
        protein: number(&value["protein_per_100"]).unwrap_or(0.0),
        carbs: number(&value["carbs_per_100"]).unwrap_or(0.0),
        fat: number(&value["fat_per_100"]).unwrap_or(0.0),
    };
    let name = value["name"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(query)
        .trim()
        .to_string();
    let brand = value["brand"].as_str().map(str::to_string).filter(|b| !b.is_empty());
    let unit = match value["serving_unit"].as_str() {
        Some("ml") => "ml",
        _ => "g",
    };
    Some(ProductRecord::new(name, brand, per_100, amount.or(number(&value["serving_size"])), unit))
}

/// Parse the first balanced JSON object embedded in free text.
pub fn first_json_object(text: &str) -> Option<Value> {
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, c) in text[start..].char_indices() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..start + i + 1];
                        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }

        search_from = start + 1;
    }

    None
}
