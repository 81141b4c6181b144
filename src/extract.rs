use scraper::element_ref::ElementRef;
use scraper::html::Select;
use scraper::{Html, Selector};

use crate::error::{ConfigError, ExtractError};
use crate::models::RawJob;

/// CSS selectors describing one job card on a search results page.
#[derive(Debug, Clone)]
pub struct CardSelectors {
    pub card: Selector,
    pub company: Selector,
    pub title: Selector,
    pub conditions: Selector,
    pub deadline: Selector,
    pub sector: Selector,
    pub salary: Selector,
}

impl CardSelectors {
    pub fn parse(
        card: &str,
        company: &str,
        title: &str,
        conditions: &str,
        deadline: &str,
        sector: &str,
        salary: &str,
    ) -> Result<Self, ConfigError> {
        let sel = |s: &str| {
            Selector::parse(s).map_err(|e| ConfigError::InvalidSelector {
                selector: s.to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            card: sel(card)?,
            company: sel(company)?,
            title: sel(title)?,
            conditions: sel(conditions)?,
            deadline: sel(deadline)?,
            sector: sel(sector)?,
            salary: sel(salary)?,
        })
    }

    /// Saramin search results layout.
    pub fn saramin() -> Self {
        Self::parse(
            ".item_recruit",
            ".corp_name a",
            ".job_tit a",
            ".job_condition span",
            ".job_date .date",
            ".job_sector",
            ".area_badge .badge",
        )
        .expect("built-in selectors are valid")
    }
}

impl Default for CardSelectors {
    fn default() -> Self {
        Self::saramin()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    selectors: CardSelectors,
}

impl Extractor {
    pub fn new(selectors: CardSelectors) -> Self {
        Self { selectors }
    }

    /// Lazily walks the job cards of an already parsed document. Each card
    /// succeeds or fails on its own.
    pub fn cards<'a>(&'a self, document: &'a Html) -> JobCards<'a> {
        JobCards {
            cards: document.select(&self.selectors.card),
            selectors: &self.selectors,
            index: 0,
        }
    }

    /// Parses one HTML page into per-card results.
    pub fn extract(&self, html: &str) -> Vec<Result<RawJob, ExtractError>> {
        let document = Html::parse_document(html);
        self.cards(&document).collect()
    }
}

pub struct JobCards<'a> {
    cards: Select<'a, 'a>,
    selectors: &'a CardSelectors,
    index: usize,
}

impl Iterator for JobCards<'_> {
    type Item = Result<RawJob, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        let card = self.cards.next()?;
        let index = self.index;
        self.index += 1;
        Some(parse_card(card, self.selectors, index))
    }
}

fn parse_card(
    card: ElementRef<'_>,
    selectors: &CardSelectors,
    index: usize,
) -> Result<RawJob, ExtractError> {
    let company = first_text(card, &selectors.company)
        .ok_or(ExtractError::MissingField { index, field: "company" })?;

    let title_el = card
        .select(&selectors.title)
        .next()
        .ok_or(ExtractError::MissingField { index, field: "title" })?;

    let mut conditions = card.select(&selectors.conditions).map(element_text);

    Ok(RawJob {
        title: element_text(title_el),
        company,
        href: title_el.value().attr("href").map(str::to_string),
        location: conditions.next(),
        experience: conditions.next(),
        education: conditions.next(),
        employment_type: conditions.next(),
        deadline: first_text(card, &selectors.deadline),
        sector: first_text(card, &selectors.sector),
        salary: first_text(card, &selectors.salary),
    })
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).next().map(element_text)
}

/// Concatenates text nodes as-is; inline tags such as keyword highlights must
/// not split a word.
fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Builds a Saramin-style result card.
    pub fn card(title: &str, company: &str, href: &str) -> String {
        format!(
            r#"<div class="item_recruit">
                <div class="area_corp"><strong class="corp_name"><a href="/zf_user/company-info">{company}</a></strong></div>
                <div class="area_job">
                    <h2 class="job_tit"><a href="{href}" title="{title}"><span>{title}</span></a></h2>
                    <div class="job_date"><span class="date">~ 11/30(토)</span></div>
                    <div class="job_condition">
                        <span><a>서울</a> <a>강남구</a></span>
                        <span>경력 3년↑</span>
                        <span>대졸↑</span>
                        <span>정규직</span>
                    </div>
                    <div class="job_sector"><a>Python</a>, <a>Django</a></div>
                    <div class="area_badge"><span class="badge">면접 후 결정</span></div>
                </div>
            </div>"#
        )
    }

    pub fn page(cards: &[String]) -> String {
        format!(
            "<html><body><div class=\"content\">{}</div></body></html>",
            cards.join("\n")
        )
    }
}
