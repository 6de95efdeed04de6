use meno_core::{GenerationRequest, ItemId, Recipe, RecipeSummary, UserPreferences};
use meno_logging::meno_debug;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::{ItemCompleter, RemoteCollection, SummaryGenerator};
use crate::settings::BackendSettings;
use crate::{TransportError, TransportKind, UpstreamError};

const USER_HEADER: &str = "x-dev-clerk-user-id";
const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Serialize)]
struct SummariesBody<'a> {
    request: &'a GenerationRequest,
    preferences: &'a UserPreferences,
    count: usize,
}

#[derive(Serialize)]
struct HydrateBody<'a> {
    request: &'a GenerationRequest,
    preferences: &'a UserPreferences,
    summary: &'a RecipeSummary,
}

#[derive(Serialize)]
struct CreateBody<'a> {
    recipe: &'a Recipe,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReorderBody<'a> {
    recipe_ids: &'a [ItemId],
}

#[derive(Deserialize)]
struct RecipesResponse<T> {
    recipes: Vec<T>,
}

#[derive(Deserialize)]
struct RecipeResponse {
    recipe: Recipe,
}

/// HTTP client for the recipe API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: Url,
    user_id: HeaderValue,
}

impl BackendClient {
    pub fn new(settings: BackendSettings) -> Result<Self, TransportError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|err| TransportError::new(TransportKind::InvalidUrl, err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::new(
                TransportKind::InvalidUrl,
                format!("{} cannot be a base url", settings.base_url),
            ));
        }
        let user_id = HeaderValue::from_str(&settings.user_id)
            .map_err(|err| TransportError::new(TransportKind::Encode, err.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| TransportError::new(TransportKind::Network, err.to_string()))?;
        Ok(Self {
            client,
            base_url,
            user_id,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::new(TransportKind::InvalidUrl, "cannot be a base url"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Vec<u8>>,
        idempotency_key: Option<&str>,
    ) -> Result<Vec<u8>, TransportError> {
        let url = self.url(segments)?;
        meno_debug!("{} {}", method, url);
        let mut request = self
            .client
            .request(method, url)
            .header(USER_HEADER, self.user_id.clone());
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_HEADER, key);
        }
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            let message = if text.trim().is_empty() {
                status.to_string()
            } else {
                text.into_owned()
            };
            return Err(TransportError::new(
                TransportKind::HttpStatus(status.as_u16()),
                message,
            ));
        }
        Ok(bytes.to_vec())
    }
}

fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(body).map_err(|err| TransportError::new(TransportKind::Encode, err.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(bytes)
        .map_err(|err| TransportError::new(TransportKind::Decode, err.to_string()))
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(TransportKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return TransportError::new(TransportKind::Decode, err.to_string());
    }
    TransportError::new(TransportKind::Network, err.to_string())
}

#[async_trait::async_trait]
impl SummaryGenerator for BackendClient {
    async fn generate(
        &self,
        preferences: &UserPreferences,
        request: &GenerationRequest,
        count: usize,
    ) -> Result<Vec<RecipeSummary>, UpstreamError> {
        let body = encode(&SummariesBody {
            request,
            preferences,
            count,
        })?;
        let key = Uuid::new_v4().to_string();
        let bytes = self
            .send(
                Method::POST,
                &["v1", "recipes", "generate-summaries"],
                Some(body),
                Some(&key),
            )
            .await?;
        let response: RecipesResponse<RecipeSummary> = decode(&bytes)?;
        Ok(response.recipes)
    }
}

#[async_trait::async_trait]
impl ItemCompleter for BackendClient {
    async fn complete(
        &self,
        preferences: &UserPreferences,
        request: &GenerationRequest,
        summary: &RecipeSummary,
    ) -> Result<Recipe, UpstreamError> {
        let body = encode(&HydrateBody {
            request,
            preferences,
            summary,
        })?;
        let bytes = self
            .send(
                Method::POST,
                &["v1", "recipes", "hydrate-recipe"],
                Some(body),
                None,
            )
            .await?;
        let response: RecipeResponse = decode(&bytes)?;
        Ok(response.recipe)
    }
}

#[async_trait::async_trait]
impl RemoteCollection for BackendClient {
    async fn list(&self) -> Result<Vec<Recipe>, TransportError> {
        let bytes = self
            .send(Method::GET, &["v1", "cookbook"], None, None)
            .await?;
        let response: RecipesResponse<Recipe> = decode(&bytes)?;
        Ok(response.recipes)
    }

    async fn create(&self, item: &Recipe) -> Result<(), TransportError> {
        let body = encode(&CreateBody { recipe: item })?;
        self.send(Method::POST, &["v1", "cookbook", "items"], Some(body), None)
            .await?;
        Ok(())
    }

    async fn delete(&self, item_id: &str) -> Result<(), TransportError> {
        self.send(
            Method::DELETE,
            &["v1", "cookbook", "items", item_id],
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn set_order(&self, item_ids: &[ItemId]) -> Result<(), TransportError> {
        let body = encode(&ReorderBody {
            recipe_ids: item_ids,
        })?;
        self.send(
            Method::PATCH,
            &["v1", "cookbook", "items", "reorder"],
            Some(body),
            None,
        )
        .await?;
        Ok(())
    }
}
