//! Navigation state: the `route` query parameter as a closed enum.

use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Adwords,
    AdwordsTask,
    PublicData,
    SocialMedia,
    Survey,
    Admin,
    AdminPrompt,
    AdminPromptChain,
    /// Any other value, kept verbatim for the not-found page.
    NotFound(String),
}

impl Route {
    /// Parse a `route` value. Empty means home.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().trim_matches('/') {
            "" | "home" => Self::Home,
            "adwords" => Self::Adwords,
            "adwords_task" => Self::AdwordsTask,
            "public_data" => Self::PublicData,
            "social_media" => Self::SocialMedia,
            "survey" => Self::Survey,
            "admin" => Self::Admin,
            "admin/prompt" => Self::AdminPrompt,
            "admin/prompt_chain" => Self::AdminPromptChain,
            _ => Self::NotFound(raw.to_owned()),
        }
    }

    /// Canonical `route` value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Home => "home",
            Self::Adwords => "adwords",
            Self::AdwordsTask => "adwords_task",
            Self::PublicData => "public_data",
            Self::SocialMedia => "social_media",
            Self::Survey => "survey",
            Self::Admin => "admin",
            Self::AdminPrompt => "admin/prompt",
            Self::AdminPromptChain => "admin/prompt_chain",
            Self::NotFound(raw) => raw,
        }
    }

    /// Relative link that navigates to this route.
    #[must_use]
    pub fn href(&self) -> String {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("route", self.as_str())
            .finish();
        format!("?{query}")
    }
}

/// Everything a view needs from the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteState {
    pub route: Route,
    pub job_id: Option<String>,
    pub api_key: Option<String>,
}

impl RouteState {
    /// Parse a query string, with or without its leading `?`. A full URL is
    /// accepted too; only its query is read.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let query = match query.split_once('?') {
            Some((_, rest)) => rest,
            None => query,
        };
        let query = query.split('#').next().unwrap_or_default();

        let mut route = None;
        let mut job = None;
        let mut job_id = None;
        let mut api_key = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim().to_owned();
            match key.as_ref() {
                "route" if route.is_none() => route = Some(value),
                "job" if job.is_none() => job = Some(value),
                "job_id" if job_id.is_none() => job_id = Some(value),
                "api_key" if api_key.is_none() => api_key = Some(value),
                _ => {}
            }
        }

        Self {
            route: Route::parse(route.as_deref().unwrap_or_default()),
            job_id: job_id.or(job).filter(|v| !v.is_empty()),
            api_key: api_key.filter(|v| !v.is_empty()),
        }
    }
}

#[cfg(test)]
#[path = "route_test.rs"]
mod tests;
