//! Azure Resource Manager client.
//!
//! Talks to the ARM REST API with bearer tokens supplied by the caller: one
//! for the landing zone account and, optionally, one for the connectivity
//! account that owns the hub. Every ensure is a GET followed by a PUT only
//! when the managed properties differ.

use async_trait::async_trait;
use reqwest::{Client, Method, Response, header};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::CloudError;
use crate::graph::AccountContext;

use super::client::{CloudClient, CloudResult};
use super::ensure::{EnsureAction, ManagedState, ResourceState, decide, normalize_location};
use super::types::{
    Change, EnsureOutcome, ManagementGroupRequest, PeeringRequest, ProviderRegistrationRequest,
    ResourceGroupRequest, RoleAssignmentRequest, SubnetRequest, SubscriptionRequest,
    VirtualNetworkRequest,
};

/// ARM endpoint.
const ARM_BASE_URL: &str = "https://management.azure.com";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Retry delay used when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

const ALIAS_API_VERSION: &str = "2021-10-01";
const AUTHORIZATION_API_VERSION: &str = "2022-04-01";
const MANAGEMENT_API_VERSION: &str = "2020-05-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";
const NETWORK_API_VERSION: &str = "2023-09-01";

/// ARM error codes that mean "not visible yet" or "busy, try again".
const TRANSIENT_CODES: &[&str] = &[
    "MissingSubscriptionRegistration",
    "SubscriptionNotFound",
    "ResourceGroupNotFound",
    "ParentResourceNotFound",
    "ReferencedResourceNotProvisioned",
    "AnotherOperationInProgress",
    "RetryableError",
];

/// Azure Resource Manager client.
#[derive(Debug, Clone)]
pub struct ArmClient {
    /// HTTP client.
    client: Client,
    /// Base URL, overridable for tests.
    base_url: String,
    /// Token for the landing zone account.
    spoke_token: String,
    /// Token for the connectivity account.
    connectivity_token: String,
}

/// ARM error envelope.
#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ArmClient {
    /// Creates a client. The connectivity token defaults to the spoke token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(spoke_token: &str, connectivity_token: Option<&str>) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CloudError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: ARM_BASE_URL.to_string(),
            spoke_token: spoke_token.to_string(),
            connectivity_token: connectivity_token.unwrap_or(spoke_token).to_string(),
        })
    }

    /// Points the client at a different endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn token(&self, context: AccountContext) -> &str {
        match context {
            AccountContext::Spoke => &self.spoke_token,
            AccountContext::Connectivity => &self.connectivity_token,
        }
    }

    /// Sends one request and classifies the response.
    async fn send(
        &self,
        context: AccountContext,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> CloudResult<Response> {
        let url = format!("{}{path}?api-version={api_version}", self.base_url);
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, &url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(context)));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(response);
        }

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(CloudError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify(status.as_u16(), path, &text))
    }

    async fn get(
        &self,
        context: AccountContext,
        path: &str,
        api_version: &str,
    ) -> CloudResult<Option<Value>> {
        let response = self.send(context, Method::GET, path, api_version, None).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }

    async fn write(
        &self,
        context: AccountContext,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> CloudResult<Value> {
        let response = self.send(context, method, path, api_version, body).await?;
        if response.status().as_u16() == 404 {
            return Err(CloudError::NotFoundYet {
                resource: path.to_string(),
            });
        }
        read_json(response).await
    }

    /// GET, compare, PUT when needed.
    async fn ensure_resource(
        &self,
        context: AccountContext,
        resource_id: String,
        api_version: &str,
        desired: &ResourceState,
        project: fn(&Value) -> ResourceState,
        body: impl FnOnce(Option<&Value>) -> Value + Send,
    ) -> CloudResult<EnsureOutcome> {
        let existing = self.get(context, &resource_id, api_version).await?;
        let observed = existing.as_ref().map(project);

        let change = match decide(observed.as_ref(), desired) {
            EnsureAction::Unchanged => {
                debug!("Unchanged: {resource_id}");
                return Ok(EnsureOutcome::new(resource_id, Change::Unchanged));
            }
            EnsureAction::Create => Change::Created,
            EnsureAction::Update => Change::Updated,
        };

        let mut payload = body(existing.as_ref());
        if let Some(existing) = &existing {
            keep_observed_tags(&mut payload, existing);
        }
        self.write(context, Method::PUT, &resource_id, api_version, Some(&payload))
            .await?;
        debug!("{change}: {resource_id}");
        Ok(EnsureOutcome::new(resource_id, change))
    }
}

async fn read_json(response: Response) -> CloudResult<Value> {
    let text = response
        .text()
        .await
        .map_err(|e| CloudError::network(format!("Failed to read response: {e}")))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| CloudError::InvalidResponse {
        message: format!("Failed to parse response: {e}"),
    })
}

/// Maps a non-success ARM response to a [`CloudError`].
fn classify(status: u16, path: &str, body: &str) -> CloudError {
    let (code, message) = serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| (String::new(), body.to_string()),
        |e| (e.error.code, e.error.message),
    );

    if TRANSIENT_CODES.contains(&code.as_str()) {
        return CloudError::NotFoundYet {
            resource: format!("{path} ({code})"),
        };
    }
    if code == "RequestDisallowedByPolicy" {
        return CloudError::policy(message);
    }

    match status {
        401 => CloudError::AuthenticationFailed { message },
        403 => CloudError::policy(format!("{code}: {message}")),
        500..=599 => CloudError::Unavailable { status, message },
        _ => CloudError::validation(format!("{status} {code}: {message}")),
    }
}

/// Tags are only written on create; an update carries whatever is live.
fn keep_observed_tags(payload: &mut Value, existing: &Value) {
    let Some(body) = payload.as_object_mut() else {
        return;
    };
    if !body.contains_key("tags") {
        return;
    }
    match existing.get("tags") {
        Some(tags) if !tags.is_null() => {
            body.insert(String::from("tags"), tags.clone());
        }
        _ => {
            body.remove("tags");
        }
    }
}

fn tags_of(value: &Value) -> BTreeMap<String, String> {
    value
        .get("tags")
        .and_then(Value::as_object)
        .map(|tags| {
            tags.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

fn bool_at(value: &Value, pointer: &str) -> bool {
    value.pointer(pointer).and_then(Value::as_bool).unwrap_or_default()
}

fn project_role_assignment(value: &Value) -> ResourceState {
    let role = str_at(value, "/properties/roleDefinitionId");
    ResourceState::untagged(json!({
        "principalId": str_at(value, "/properties/principalId").to_ascii_lowercase(),
        "roleDefinitionId": role.rsplit('/').next().unwrap_or(role).to_ascii_lowercase(),
    }))
}

fn project_existence(_value: &Value) -> ResourceState {
    ResourceState::untagged(json!({}))
}

fn project_resource_group(value: &Value) -> ResourceState {
    ResourceState::new(
        json!({ "location": normalize_location(str_at(value, "/location")) }),
        tags_of(value),
    )
}

fn project_virtual_network(value: &Value) -> ResourceState {
    let prefixes = value
        .pointer("/properties/addressSpace/addressPrefixes")
        .cloned()
        .unwrap_or_else(|| json!([]));
    ResourceState::new(
        json!({
            "location": normalize_location(str_at(value, "/location")),
            "addressPrefixes": prefixes,
        }),
        tags_of(value),
    )
}

fn project_subnet(value: &Value) -> ResourceState {
    let prefix = value
        .pointer("/properties/addressPrefix")
        .or_else(|| value.pointer("/properties/addressPrefixes/0"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    ResourceState::untagged(json!({ "addressPrefix": prefix }))
}

fn project_peering(value: &Value) -> ResourceState {
    ResourceState::untagged(json!({
        "remoteVirtualNetworkId": str_at(value, "/properties/remoteVirtualNetwork/id").to_ascii_lowercase(),
        "allowVirtualNetworkAccess": bool_at(value, "/properties/allowVirtualNetworkAccess"),
        "allowForwardedTraffic": bool_at(value, "/properties/allowForwardedTraffic"),
        "allowGatewayTransit": bool_at(value, "/properties/allowGatewayTransit"),
        "useRemoteGateways": bool_at(value, "/properties/useRemoteGateways"),
    }))
}

#[async_trait]
impl CloudClient for ArmClient {
    async fn ensure_subscription(&self, request: &SubscriptionRequest) -> CloudResult<EnsureOutcome> {
        let path = format!("/providers/Microsoft.Subscription/aliases/{}", request.alias);
        let ctx = AccountContext::Spoke;

        let (alias, change) = match self.get(ctx, &path, ALIAS_API_VERSION).await? {
            Some(existing) => (existing, Change::Unchanged),
            None => {
                let Some(billing_scope) = &request.billing_scope else {
                    return Err(CloudError::validation(format!(
                        "Alias '{}' does not exist and no billing scope is configured",
                        request.alias
                    )));
                };
                let body = json!({
                    "properties": {
                        "displayName": request.display_name,
                        "workload": request.workload.to_string(),
                        "billingScope": billing_scope,
                        "additionalProperties": { "tags": request.tags },
                    }
                });
                let created = self
                    .write(ctx, Method::PUT, &path, ALIAS_API_VERSION, Some(&body))
                    .await?;
                (created, Change::Created)
            }
        };

        // Creation is asynchronous; the id appears once provisioning completes.
        let subscription_id = str_at(&alias, "/properties/subscriptionId");
        if subscription_id.is_empty() {
            return Err(CloudError::NotFoundYet {
                resource: format!("subscription id for alias '{}'", request.alias),
            });
        }
        Ok(EnsureOutcome::new(format!("/subscriptions/{subscription_id}"), change))
    }

    async fn ensure_role_assignment(
        &self,
        request: &RoleAssignmentRequest,
    ) -> CloudResult<EnsureOutcome> {
        // Role assignments are immutable; a diverging one is rejected by ARM
        // with 409 and surfaces as a validation error.
        let desired = request.desired_state();
        self.ensure_resource(
            AccountContext::Spoke,
            request.resource_id(),
            AUTHORIZATION_API_VERSION,
            &desired,
            project_role_assignment,
            |_| {
                json!({
                    "properties": {
                        "roleDefinitionId": request.role_definition_resource_id(),
                        "principalId": request.principal_id,
                    }
                })
            },
        )
        .await
    }

    async fn ensure_management_group_association(
        &self,
        request: &ManagementGroupRequest,
    ) -> CloudResult<EnsureOutcome> {
        let desired = request.desired_state();
        self.ensure_resource(
            AccountContext::Spoke,
            request.resource_id(),
            MANAGEMENT_API_VERSION,
            &desired,
            project_existence,
            |_| json!({}),
        )
        .await
    }

    async fn ensure_resource_group(&self, request: &ResourceGroupRequest) -> CloudResult<EnsureOutcome> {
        let desired = request.desired_state();
        self.ensure_resource(
            AccountContext::Spoke,
            request.resource_id(),
            RESOURCES_API_VERSION,
            &desired,
            project_resource_group,
            |_| json!({ "location": request.location, "tags": request.tags }),
        )
        .await
    }

    async fn ensure_provider_registration(
        &self,
        request: &ProviderRegistrationRequest,
    ) -> CloudResult<EnsureOutcome> {
        let ctx = AccountContext::Spoke;
        let mut change = Change::Unchanged;

        for namespace in &request.namespaces {
            let path = format!("/subscriptions/{}/providers/{namespace}", request.subscription_id);
            let state = self
                .get(ctx, &path, RESOURCES_API_VERSION)
                .await?
                .map(|v| str_at(&v, "/registrationState").to_string())
                .unwrap_or_default();
            if state == "Registered" {
                continue;
            }

            debug!("Registering provider {namespace} (state: {state})");
            self.write(
                ctx,
                Method::POST,
                &format!("{path}/register"),
                RESOURCES_API_VERSION,
                None,
            )
            .await?;
            change = Change::Updated;
        }

        Ok(EnsureOutcome::new(request.resource_id(), change))
    }

    async fn ensure_virtual_network(
        &self,
        request: &VirtualNetworkRequest,
    ) -> CloudResult<EnsureOutcome> {
        let desired = request.desired_state();
        self.ensure_resource(
            AccountContext::Spoke,
            request.resource_id(),
            NETWORK_API_VERSION,
            &desired,
            project_virtual_network,
            |existing| {
                // A PUT without subnets would delete the existing ones.
                let subnets = existing
                    .and_then(|v| v.pointer("/properties/subnets"))
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                json!({
                    "location": request.location,
                    "tags": request.tags,
                    "properties": {
                        "addressSpace": { "addressPrefixes": request.address_space },
                        "subnets": subnets,
                    }
                })
            },
        )
        .await
    }

    async fn ensure_subnet(&self, request: &SubnetRequest) -> CloudResult<EnsureOutcome> {
        let desired = request.desired_state();
        self.ensure_resource(
            AccountContext::Spoke,
            request.resource_id(),
            NETWORK_API_VERSION,
            &desired,
            project_subnet,
            |_| json!({ "properties": { "addressPrefix": request.address_prefix } }),
        )
        .await
    }

    async fn ensure_peering(
        &self,
        context: AccountContext,
        request: &PeeringRequest,
    ) -> CloudResult<EnsureOutcome> {
        let desired = request.desired_state();
        self.ensure_resource(
            context,
            request.resource_id(),
            NETWORK_API_VERSION,
            &desired,
            project_peering,
            |_| {
                json!({
                    "properties": {
                        "remoteVirtualNetwork": { "id": request.remote_virtual_network_id },
                        "allowVirtualNetworkAccess": request.allow_virtual_network_access,
                        "allowForwardedTraffic": request.allow_forwarded_traffic,
                        "allowGatewayTransit": request.allow_gateway_transit,
                        "useRemoteGateways": request.use_remote_gateways,
                    }
                })
            },
        )
        .await
    }

    fn backend_type(&self) -> &'static str {
        "arm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RG_PATH: &str = "/subscriptions/s1/resourceGroups/rg-a";

    async fn client(server: &MockServer) -> ArmClient {
        ArmClient::new("spoke-token", Some("hub-token"))
            .unwrap()
            .with_base_url(server.uri())
    }

    fn rg_request(owner: &str) -> ResourceGroupRequest {
        ResourceGroupRequest {
            subscription_id: String::from("s1"),
            name: String::from("rg-a"),
            location: String::from("japaneast"),
            tags: BTreeMap::from([(String::from("owner"), owner.to_string())]),
        }
    }

    #[tokio::test]
    async fn test_resource_group_created() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(RG_PATH))
            .and(header_eq("authorization", "Bearer spoke-token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "location": "japaneast" })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server)
            .await
            .ensure_resource_group(&rg_request("a"))
            .await
            .unwrap();
        assert_eq!(outcome.change, Change::Created);
        assert_eq!(outcome.resource_id, RG_PATH);
    }

    #[tokio::test]
    async fn test_resource_group_tag_drift_skips_put() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "location": "Japan East",
                "tags": { "owner": "someone-else" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = client(&server)
            .await
            .ensure_resource_group(&rg_request("a"))
            .await
            .unwrap();
        assert_eq!(outcome.change, Change::Unchanged);
    }

    #[tokio::test]
    async fn test_update_keeps_live_tags() {
        let server = MockServer::start().await;
        let request = VirtualNetworkRequest {
            subscription_id: String::from("s1"),
            resource_group_name: String::from("rg-a"),
            name: String::from("vnet-a"),
            location: String::from("japaneast"),
            address_space: vec![String::from("10.0.0.0/16"), String::from("10.1.0.0/16")],
            tags: BTreeMap::from([(String::from("owner"), String::from("config"))]),
        };
        let vnet_path = request.resource_id();

        Mock::given(method("GET"))
            .and(path(vnet_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "location": "japaneast",
                "tags": { "owner": "manual-edit" },
                "properties": { "addressSpace": { "addressPrefixes": ["10.0.0.0/16"] } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(vnet_path.as_str()))
            .and(body_partial_json(json!({ "tags": { "owner": "manual-edit" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server)
            .await
            .ensure_virtual_network(&request)
            .await
            .unwrap();
        assert_eq!(outcome.change, Change::Updated);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .ensure_resource_group(&rg_request("a"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .ensure_resource_group(&rg_request("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Unavailable { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_policy_denial_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RG_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": "RequestDisallowedByPolicy", "message": "denied by policy" }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .ensure_resource_group(&rg_request("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Policy { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_registration_is_transient() {
        let err = classify(
            409,
            "/x",
            r#"{"error":{"code":"MissingSubscriptionRegistration","message":"register first"}}"#,
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_alias_created() {
        let server = MockServer::start().await;
        let alias_path = "/providers/Microsoft.Subscription/aliases/sub-a";
        Mock::given(method("GET"))
            .and(path(alias_path))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(alias_path))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "properties": { "subscriptionId": "1111-2222", "provisioningState": "Succeeded" }
            })))
            .mount(&server)
            .await;

        let request = SubscriptionRequest {
            alias: String::from("sub-a"),
            display_name: String::from("A"),
            workload: crate::config::Workload::Production,
            billing_scope: Some(String::from("/providers/Microsoft.Billing/x")),
            tags: BTreeMap::new(),
        };
        let outcome = client(&server).await.ensure_subscription(&request).await.unwrap();
        assert_eq!(outcome.resource_id, "/subscriptions/1111-2222");
        assert_eq!(outcome.change, Change::Created);
    }

    #[tokio::test]
    async fn test_hub_peering_uses_connectivity_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(header_eq("authorization", "Bearer hub-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let request = PeeringRequest {
            subscription_id: String::from("hub-sub"),
            resource_group_name: String::from("rg-hub"),
            virtual_network_name: String::from("vnet-hub"),
            name: String::from("vnet-hub-to-vnet-a"),
            remote_virtual_network_id: String::from("/subscriptions/s1/x"),
            allow_virtual_network_access: true,
            allow_forwarded_traffic: true,
            allow_gateway_transit: true,
            use_remote_gateways: false,
        };
        let outcome = client(&server)
            .await
            .ensure_peering(AccountContext::Connectivity, &request)
            .await
            .unwrap();
        assert_eq!(outcome.change, Change::Created);
    }
}
