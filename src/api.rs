//! Typed helpers for the Agora HTTP API.
//!
//! Every call goes through [`RequestClient`], so timeouts, retries and the
//! one-shot credential refresh apply uniformly. Response shapes the backend
//! does not pin down are returned as `serde_json::Value`.
//!
//! Login, register, the public contract read and the refresh call are sent
//! without a bearer header; everything else is authenticated.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::request::{
    Body, ErrorKind, Expect, HttpResponse, Part, RequestClient, RequestError, RequestOptions, ResponseBody,
};
use crate::session::Session;

pub const DEFAULT_AVATAR_PATH: &str = "/media/avatars/default.png";

const LISTINGS: &str = "/api/marketplace/listings";

// =============================================================================
// TYPES
// =============================================================================

/// What a like toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTarget<'a> {
    Post(&'a str),
    Video(&'a str),
}

/// Body of a successful `POST /api/auth/login`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub user_id: Option<Value>,
}

/// Fields for `POST /api/auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// A file attached to a multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

impl Upload {
    #[must_use]
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { filename: filename.into(), bytes, mime: None }
    }

    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    fn into_part(self, field: &str) -> Part {
        let part = Part::file(field, self.filename, self.bytes);
        match self.mime {
            Some(mime) => part.with_mime(mime),
            None => part,
        }
    }
}

/// New marketplace listing. Absent fields are not sent.
#[derive(Debug, Clone, Default)]
pub struct NewListing {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub category: Option<String>,
    pub metadata: Option<Value>,
    pub files: Vec<Upload>,
}

impl NewListing {
    fn into_parts(self) -> Vec<Part> {
        let mut parts = Vec::new();
        let text_fields = [
            ("title", self.title),
            ("description", self.description),
            ("price", self.price.map(|p| p.to_string())),
            ("currency", self.currency),
            ("category", self.category),
            ("metadata", self.metadata.map(|m| m.to_string())),
        ];
        for (name, value) in text_fields {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                parts.push(Part::text(name, value));
            }
        }
        parts.extend(self.files.into_iter().map(|file| file.into_part("files")));
        parts
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Clone)]
pub struct Api {
    client: RequestClient,
}

impl Api {
    #[must_use]
    pub fn new(client: RequestClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &RequestClient {
        &self.client
    }

    /// Absolute URL for a media path relative to the current base URL.
    #[must_use]
    pub fn media_url(&self, path: &str) -> String {
        media_url(&self.client.base_url(), path)
    }

    #[must_use]
    pub fn default_avatar_url(&self) -> String {
        default_avatar_url(&self.client.base_url())
    }

    async fn get(&self, path: &str) -> Result<Value, RequestError> {
        self.client.request_json(path, RequestOptions::get()).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, RequestError> {
        self.client.request_json(path, RequestOptions::post().json(body)).await
    }

    // -------------------------------------------------------------------------
    // auth
    // -------------------------------------------------------------------------

    /// Log in with email and password and store the returned credential in
    /// the session. The display name comes from the response only.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the call fails or the response has no token.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, RequestError> {
        let options = RequestOptions::post()
            .json(json!({ "email": email, "password": password }))
            .anonymous();
        let response: LoginResponse = self.client.request_json("/api/auth/login", options).await?;
        if response.token.is_empty() {
            return Err(RequestError::new(ErrorKind::Decode, "login response has an empty token"));
        }

        let session = Session {
            token: Some(response.token.clone()),
            refresh_token: response.refresh_token.clone(),
            user_id: response.user_id.as_ref().and_then(id_string),
            username: response.username.clone(),
            avatar_url: response.avatar_url.clone(),
        };
        if let Err(e) = self.client.session().login(session) {
            warn!(error = %e, "session not persisted after login");
        }
        info!(username = response.username.as_deref(), "logged in");
        Ok(response)
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] when the backend rejects the registration.
    pub async fn register(&self, registration: &Registration) -> Result<ResponseBody, RequestError> {
        let body = serde_json::to_value(registration)
            .map_err(|e| RequestError::new(ErrorKind::InvalidRequest, e.to_string()))?;
        self.client
            .request("/api/auth/register", RequestOptions::post().json(body).anonymous())
            .await
    }

    // -------------------------------------------------------------------------
    // posts, likes, comments
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn list_posts(&self) -> Result<Value, RequestError> {
        self.get("/api/posts").await
    }

    /// Create a post with optional image.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn create_post(&self, content: &str, image: Option<Upload>) -> Result<Value, RequestError> {
        let mut parts = vec![Part::text("content", content)];
        parts.extend(image.map(|image| image.into_part("image")));
        self.client
            .request_json("/api/posts", RequestOptions::post().body(Body::Multipart(parts)))
            .await
    }

    /// Like or unlike a post or a video. The unused id is sent as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn toggle_like(&self, target: LikeTarget<'_>) -> Result<Value, RequestError> {
        let body = match target {
            LikeTarget::Post(id) => json!({ "postId": id, "videoId": null }),
            LikeTarget::Video(id) => json!({ "postId": null, "videoId": id }),
        };
        self.post_json("/api/likes/toggle", body).await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn list_comments(&self, post_id: &str) -> Result<Value, RequestError> {
        self.get(&format!("/api/comments/post/{post_id}")).await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn add_comment(&self, post_id: &str, content: &str) -> Result<Value, RequestError> {
        self.post_json("/api/comments", json!({ "postId": post_id, "content": content }))
            .await
    }

    // -------------------------------------------------------------------------
    // conversations
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn list_conversations(&self) -> Result<Value, RequestError> {
        self.get("/api/conversations").await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn conversation_messages(&self, conversation_id: &str) -> Result<Value, RequestError> {
        self.get(&format!("/api/messages/conversations/{conversation_id}/messages"))
            .await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn get_or_create_conversation(&self, user_id: &str) -> Result<Value, RequestError> {
        self.client
            .request_json(&format!("/api/conversations/with/{user_id}"), RequestOptions::post())
            .await
    }

    // -------------------------------------------------------------------------
    // users
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn profile(&self) -> Result<Value, RequestError> {
        self.get("/api/users/me").await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn list_users(&self) -> Result<Value, RequestError> {
        self.get("/api/users").await
    }

    /// Rename the current user; the session's display name follows.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn update_username(&self, username: &str) -> Result<ResponseBody, RequestError> {
        let body = self
            .client
            .request("/api/users/update", RequestOptions::put().json(json!({ "username": username })))
            .await?;
        let avatar = self.client.session().snapshot().avatar_url;
        if let Err(e) = self.client.session().set_profile(Some(username.to_owned()), avatar) {
            warn!(error = %e, "username not persisted");
        }
        Ok(body)
    }

    /// Upload a new avatar; a returned `avatarUrl` is stored in the session.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn upload_avatar(&self, file: Upload) -> Result<ResponseBody, RequestError> {
        let options = RequestOptions::post().body(Body::Multipart(vec![file.into_part("file")]));
        let body = self.client.request("/api/users/avatar", options).await?;

        let avatar = match &body {
            ResponseBody::Json(value) => value.get("avatarUrl").and_then(Value::as_str).map(ToOwned::to_owned),
            ResponseBody::Text(text) if text.starts_with('/') || text.starts_with("http") => Some(text.clone()),
            _ => None,
        };
        if let Some(avatar) = avatar {
            let username = self.client.session().snapshot().username;
            if let Err(e) = self.client.session().set_profile(username, Some(avatar)) {
                warn!(error = %e, "avatar not persisted");
            }
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // contracts
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn active_contract(&self) -> Result<Value, RequestError> {
        self.client
            .request_json("/api/contracts/active", RequestOptions::get().anonymous())
            .await
    }

    /// Contract document bytes with their response headers.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn download_contract(&self, contract_id: &str) -> Result<HttpResponse, RequestError> {
        let body = self
            .client
            .request(
                &format!("/api/contracts/{contract_id}/download"),
                RequestOptions::get().expect(Expect::Raw),
            )
            .await?;
        match body {
            ResponseBody::Raw(response) => Ok(response),
            _ => Err(RequestError::new(ErrorKind::Decode, "expected raw contract body")),
        }
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn accept_contract(
        &self,
        user_id: &str,
        contract_id: &str,
        accepted: bool,
    ) -> Result<String, RequestError> {
        let body = json!({ "userId": user_id, "contractId": contract_id, "accepted": accepted });
        let response = self
            .client
            .request("/api/contracts/accept", RequestOptions::post().json(body))
            .await?;
        Ok(response.into_text())
    }

    // -------------------------------------------------------------------------
    // marketplace
    // -------------------------------------------------------------------------

    /// List listings filtered by query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn list_listings(&self, params: &[(&str, &str)]) -> Result<Value, RequestError> {
        let url = self.listings_url(params)?;
        self.get(&url).await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn search_listings(&self, query: &str, options: &[(&str, &str)]) -> Result<Value, RequestError> {
        let mut params = Vec::with_capacity(options.len() + 1);
        params.push(("q", query));
        params.extend_from_slice(options);
        self.list_listings(&params).await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn listing(&self, listing_id: &str) -> Result<Value, RequestError> {
        self.get(&format!("{LISTINGS}/{listing_id}")).await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn create_listing(&self, listing: NewListing) -> Result<Value, RequestError> {
        let options = RequestOptions::post().body(Body::Multipart(listing.into_parts()));
        self.client.request_json(LISTINGS, options).await
    }

    /// Update a listing. Sent as JSON, or as multipart when `files` is not empty.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn update_listing(
        &self,
        listing_id: &str,
        updates: &serde_json::Map<String, Value>,
        files: Vec<Upload>,
    ) -> Result<Value, RequestError> {
        let path = format!("{LISTINGS}/{listing_id}");
        let body = if files.is_empty() {
            Body::Json(Value::Object(updates.clone()))
        } else {
            let mut parts: Vec<Part> = updates
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| match value {
                    Value::String(text) => Part::text(key.as_str(), text.as_str()),
                    other => Part::text(key.as_str(), other.to_string()),
                })
                .collect();
            parts.extend(files.into_iter().map(|file| file.into_part("files")));
            Body::Multipart(parts)
        };
        self.client.request_json(&path, RequestOptions::put().body(body)).await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn delete_listing(&self, listing_id: &str) -> Result<ResponseBody, RequestError> {
        self.client
            .request(&format!("{LISTINGS}/{listing_id}"), RequestOptions::delete())
            .await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn upload_listing_image(&self, listing_id: &str, file: Upload) -> Result<Value, RequestError> {
        let options = RequestOptions::post().body(Body::Multipart(vec![file.into_part("file")]));
        self.client
            .request_json(&format!("{LISTINGS}/{listing_id}/image"), options)
            .await
    }

    /// Create or fetch the conversation with a seller.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn contact_seller(&self, seller_user_id: &str) -> Result<Value, RequestError> {
        self.client
            .request_json(&format!("/api/marketplace/contact/{seller_user_id}"), RequestOptions::post())
            .await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn listing_conversations(&self, listing_id: &str) -> Result<Value, RequestError> {
        self.get(&format!("{LISTINGS}/{listing_id}/conversations")).await
    }

    /// # Errors
    ///
    /// Returns [`RequestError`] on any request failure.
    pub async fn pay_listing(&self, listing_id: &str) -> Result<Value, RequestError> {
        self.client
            .request_json(&format!("{LISTINGS}/{listing_id}/pay"), RequestOptions::post())
            .await
    }

    fn listings_url(&self, params: &[(&str, &str)]) -> Result<String, RequestError> {
        if params.is_empty() {
            return Ok(LISTINGS.to_owned());
        }
        let mut url = reqwest::Url::parse(&self.client.resolve_url(LISTINGS))
            .map_err(|e| RequestError::new(ErrorKind::InvalidRequest, format!("invalid base URL: {e}")))?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.into())
    }
}

/// Absolute media URL: empty paths stay empty, `http` URLs pass through.
#[must_use]
pub fn media_url(base_url: &str, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    if path.starts_with("http") {
        return path.to_owned();
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') { format!("{base}{path}") } else { format!("{base}/{path}") }
}

#[must_use]
pub fn default_avatar_url(base_url: &str) -> String {
    media_url(base_url, DEFAULT_AVATAR_PATH)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
