//! Thin REST adapter implementing the capability traits
//!
//! The adapter maps the platform's v3-style API onto the typed domain
//! records. It is deliberately point-to-point: no retries, no backoff.
//! Failures are classified (retryable transport/5xx vs. fatal 4xx) and
//! surfaced to the reconcilers, which own the retry policy.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use strata_common::{Error, GENERATION_ANNOTATION, OWNER_LABEL, PARAMETER_HASH_ANNOTATION};
use tracing::debug;

use crate::client::{
    BindingChanges, BindingRequest, HealthChecker, InstanceChanges, InstanceRequest,
    OrganizationClient, SpaceClient,
};
use crate::model::{Binding, Instance, LastOperation, RemoteState, Space};

/// REST client bound to one organization and optionally one space
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    organization: String,
    space_id: Option<String>,
}

impl PlatformClient {
    /// Create a client scoped to an organization
    pub fn organization_scoped(
        http: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            organization: organization.into(),
            space_id: None,
        }
    }

    /// Create a client scoped to a space within an organization
    pub fn space_scoped(
        http: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        organization: impl Into<String>,
        space_id: impl Into<String>,
    ) -> Self {
        Self {
            space_id: Some(space_id.into()),
            ..Self::organization_scoped(http, base_url, username, password, organization)
        }
    }

    fn space_id(&self) -> Result<&str, Error> {
        self.space_id
            .as_deref()
            .ok_or_else(|| Error::internal("space-scoped call on organization-scoped client"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn request(
        &self,
        operation: &str,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, Error> {
        self.request_url(operation, method, &self.url(path), query, body)
            .await
    }

    async fn request_url(
        &self,
        operation: &str,
        method: reqwest::Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, Error> {
        let mut req = self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query);
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::platform(operation, e.to_string()))?;

        let status = response.status();
        debug!(operation, url, status = status.as_u16(), "platform call");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::platform(
                operation,
                format!("platform returned {status}"),
            ));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::platform_fatal(
                operation,
                format!("platform returned {status}: {detail}"),
            ));
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Some(Value::Null));
        }
        let value = response
            .json::<Value>()
            .await
            .map_err(|e| Error::platform(operation, format!("malformed response: {e}")))?;
        Ok(Some(value))
    }

    /// Issue a list call and enforce the at-most-one-per-owner invariant
    async fn single_by_owner<T>(
        &self,
        operation: &str,
        path: &str,
        owner: &str,
        extra_query: &[(&str, &str)],
        parse: impl Fn(&Value) -> Result<T, Error>,
    ) -> Result<Option<T>, Error> {
        let selector = format!("{OWNER_LABEL}=={owner}");
        let mut query = vec![("label_selector", selector.as_str())];
        query.extend_from_slice(extra_query);

        let Some(body) = self
            .request(operation, reqwest::Method::GET, path, &query, None)
            .await?
        else {
            return Ok(None);
        };
        let resources = list_resources(operation, &body)?;
        match resources.len() {
            0 => Ok(None),
            1 => parse(&resources[0]).map(Some),
            n => Err(Error::inconsistent(
                owner,
                format!("{n} remote records share owner token {owner}"),
            )),
        }
    }

    /// Collect all pages of a list call by following the pagination links
    async fn list_paginated(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<Value>, Error> {
        let Some(mut page) = self
            .request(operation, reqwest::Method::GET, path, query, None)
            .await?
        else {
            return Ok(Vec::new());
        };

        let mut resources = list_resources(operation, &page)?;
        while let Some(next) = next_page_url(&page) {
            page = self
                .request_url(operation, reqwest::Method::GET, &next, &[], None)
                .await?
                .ok_or_else(|| Error::platform(operation, "pagination page vanished mid-sweep"))?;
            resources.extend(list_resources(operation, &page)?);
        }
        Ok(resources)
    }

    async fn single_by_name<T>(
        &self,
        operation: &str,
        path: &str,
        name: &str,
        extra_query: &[(&str, &str)],
        parse: impl Fn(&Value) -> Result<T, Error>,
    ) -> Result<Option<T>, Error> {
        let mut query = vec![("names", name)];
        query.extend_from_slice(extra_query);

        let Some(body) = self
            .request(operation, reqwest::Method::GET, path, &query, None)
            .await?
        else {
            return Ok(None);
        };
        let resources = list_resources(operation, &body)?;
        match resources.first() {
            None => Ok(None),
            Some(resource) => parse(resource).map(Some),
        }
    }
}

fn next_page_url(body: &Value) -> Option<String> {
    body.pointer("/pagination/next/href")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn list_resources(operation: &str, body: &Value) -> Result<Vec<Value>, Error> {
    body.get("resources")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| Error::platform(operation, "response has no resources array"))
}

#[derive(Debug, Default, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

fn metadata(resource: &Value) -> WireMetadata {
    resource
        .get("metadata")
        .and_then(|m| serde_json::from_value(m.clone()).ok())
        .unwrap_or_default()
}

fn tracking_metadata(owner: Option<&str>, generation: Option<i64>, hash: Option<&str>) -> Value {
    let mut labels = serde_json::Map::new();
    let mut annotations = serde_json::Map::new();
    if let Some(owner) = owner {
        labels.insert(OWNER_LABEL.to_string(), json!(owner));
    }
    if let Some(generation) = generation {
        annotations.insert(GENERATION_ANNOTATION.to_string(), json!(generation.to_string()));
    }
    if let Some(hash) = hash {
        annotations.insert(PARAMETER_HASH_ANNOTATION.to_string(), json!(hash));
    }
    json!({ "labels": labels, "annotations": annotations })
}

fn required_str(operation: &str, resource: &Value, key: &str) -> Result<String, Error> {
    resource
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::platform(operation, format!("resource missing field {key}")))
}

fn parse_space(operation: &str, resource: &Value) -> Result<Space, Error> {
    let meta = metadata(resource);
    Ok(Space {
        id: required_str(operation, resource, "guid")?,
        name: required_str(operation, resource, "name")?,
        owner: meta.labels.get(OWNER_LABEL).cloned(),
        generation: meta
            .annotations
            .get(GENERATION_ANNOTATION)
            .and_then(|g| g.parse().ok()),
    })
}

fn parse_last_operation(resource: &Value) -> Option<LastOperation> {
    resource
        .get("last_operation")
        .and_then(|op| serde_json::from_value(op.clone()).ok())
}

fn parse_instance(operation: &str, resource: &Value) -> Result<Instance, Error> {
    let meta = metadata(resource);
    Ok(Instance {
        id: required_str(operation, resource, "guid")?,
        name: required_str(operation, resource, "name")?,
        owner: meta.labels.get(OWNER_LABEL).cloned(),
        generation: meta
            .annotations
            .get(GENERATION_ANNOTATION)
            .and_then(|g| g.parse().ok()),
        parameter_hash: meta.annotations.get(PARAMETER_HASH_ANNOTATION).cloned(),
        plan_id: resource
            .pointer("/relationships/service_plan/data/guid")
            .and_then(Value::as_str)
            .map(str::to_string),
        tags: resource
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        state: RemoteState::from_last_operation(parse_last_operation(resource)),
    })
}

fn parse_binding(operation: &str, resource: &Value) -> Result<Binding, Error> {
    let meta = metadata(resource);
    Ok(Binding {
        id: required_str(operation, resource, "guid")?,
        name: required_str(operation, resource, "name")?,
        owner: meta.labels.get(OWNER_LABEL).cloned(),
        generation: meta
            .annotations
            .get(GENERATION_ANNOTATION)
            .and_then(|g| g.parse().ok()),
        parameter_hash: meta.annotations.get(PARAMETER_HASH_ANNOTATION).cloned(),
        state: RemoteState::from_last_operation(parse_last_operation(resource)),
        credentials: None,
    })
}

#[async_trait]
impl OrganizationClient for PlatformClient {
    async fn get_space_by_owner(&self, owner: &str) -> Result<Option<Space>, Error> {
        let op = "get space by owner";
        self.single_by_owner(
            op,
            "/v3/spaces",
            owner,
            &[("organization_names", self.organization.as_str())],
            |r| parse_space(op, r),
        )
        .await
    }

    async fn get_space_by_name(&self, name: &str) -> Result<Option<Space>, Error> {
        let op = "get space by name";
        self.single_by_name(
            op,
            "/v3/spaces",
            name,
            &[("organization_names", self.organization.as_str())],
            |r| parse_space(op, r),
        )
        .await
    }

    async fn list_spaces(&self) -> Result<Vec<Space>, Error> {
        let op = "list spaces";
        self.list_paginated(
            op,
            "/v3/spaces",
            &[
                ("organization_names", self.organization.as_str()),
                ("label_selector", OWNER_LABEL),
            ],
        )
        .await?
        .iter()
        .map(|r| parse_space(op, r))
        .collect()
    }

    async fn create_space(&self, name: &str, owner: &str, generation: i64) -> Result<(), Error> {
        let body = json!({
            "name": name,
            "organization_name": self.organization,
            "metadata": tracking_metadata(Some(owner), Some(generation), None),
        });
        self.request(
            "create space",
            reqwest::Method::POST,
            "/v3/spaces",
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn update_space(
        &self,
        id: &str,
        name: &str,
        owner: &str,
        generation: i64,
    ) -> Result<(), Error> {
        let body = json!({
            "name": name,
            "metadata": tracking_metadata(Some(owner), Some(generation), None),
        });
        self.request(
            "update space",
            reqwest::Method::PATCH,
            &format!("/v3/spaces/{id}"),
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_space(&self, id: &str) -> Result<(), Error> {
        self.request(
            "delete space",
            reqwest::Method::DELETE,
            &format!("/v3/spaces/{id}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    async fn add_developer(&self, space_id: &str, username: &str) -> Result<(), Error> {
        let body = json!({
            "type": "space_developer",
            "space_id": space_id,
            "username": username,
        });
        // The platform answers the grant idempotently; an already-existing
        // role is a success, not a conflict.
        self.request(
            "add developer",
            reqwest::Method::POST,
            "/v3/roles",
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SpaceClient for PlatformClient {
    async fn get_instance_by_owner(&self, owner: &str) -> Result<Option<Instance>, Error> {
        let op = "get instance by owner";
        let space_id = self.space_id()?;
        self.single_by_owner(
            op,
            "/v3/service_instances",
            owner,
            &[("space_guids", space_id)],
            |r| parse_instance(op, r),
        )
        .await
    }

    async fn get_instance_by_name(&self, name: &str) -> Result<Option<Instance>, Error> {
        let op = "get instance by name";
        let space_id = self.space_id()?;
        self.single_by_name(
            op,
            "/v3/service_instances",
            name,
            &[("space_guids", space_id)],
            |r| parse_instance(op, r),
        )
        .await
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, Error> {
        let op = "list instances";
        let space_id = self.space_id()?;
        self.list_paginated(
            op,
            "/v3/service_instances",
            &[("space_guids", space_id), ("label_selector", OWNER_LABEL)],
        )
        .await?
        .iter()
        .map(|r| parse_instance(op, r))
        .collect()
    }

    async fn create_instance(&self, request: &InstanceRequest) -> Result<(), Error> {
        let space_id = self.space_id()?;
        let mut body = json!({
            "type": "managed",
            "name": request.name,
            "relationships": {
                "space": { "data": { "guid": space_id } },
                "service_plan": { "data": { "guid": request.plan_id } },
            },
            "metadata": tracking_metadata(
                Some(&request.owner),
                Some(request.generation),
                Some(&request.parameter_hash),
            ),
        });
        if let Some(params) = &request.parameters {
            body["parameters"] = params.clone();
        }
        if !request.tags.is_empty() {
            body["tags"] = json!(request.tags);
        }
        self.request(
            "create instance",
            reqwest::Method::POST,
            "/v3/service_instances",
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn update_instance(&self, id: &str, changes: &InstanceChanges) -> Result<(), Error> {
        // An empty update must not be sent: the platform treats some empty
        // fields as "clear", which is never what a no-op diff means.
        if changes.is_empty() {
            return Ok(());
        }
        let mut body = json!({
            "metadata": tracking_metadata(
                changes.owner.as_deref(),
                changes.generation,
                changes.parameter_hash.as_deref(),
            ),
        });
        if let Some(name) = &changes.name {
            body["name"] = json!(name);
        }
        if let Some(plan_id) = &changes.plan_id {
            body["relationships"] = json!({
                "service_plan": { "data": { "guid": plan_id } }
            });
        }
        if let Some(params) = &changes.parameters {
            body["parameters"] = params.clone();
        }
        if let Some(tags) = &changes.tags {
            body["tags"] = json!(tags);
        }
        self.request(
            "update instance",
            reqwest::Method::PATCH,
            &format!("/v3/service_instances/{id}"),
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> Result<(), Error> {
        self.request(
            "delete instance",
            reqwest::Method::DELETE,
            &format!("/v3/service_instances/{id}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    async fn find_service_plan(&self, offering: &str, plan: &str) -> Result<String, Error> {
        let op = "find service plan";
        let Some(body) = self
            .request(
                op,
                reqwest::Method::GET,
                "/v3/service_plans",
                &[("names", plan), ("service_offering_names", offering)],
                None,
            )
            .await?
        else {
            return Err(Error::platform_fatal(
                op,
                format!("no plan {plan} in offering {offering}"),
            ));
        };
        let resources = list_resources(op, &body)?;
        match resources.first() {
            Some(resource) => required_str(op, resource, "guid"),
            None => Err(Error::platform_fatal(
                op,
                format!("no plan {plan} in offering {offering}"),
            )),
        }
    }

    async fn get_binding_by_owner(&self, owner: &str) -> Result<Option<Binding>, Error> {
        let op = "get binding by owner";
        let space_id = self.space_id()?;
        let binding = self
            .single_by_owner(
                op,
                "/v3/service_credential_bindings",
                owner,
                &[("space_guids", space_id)],
                |r| parse_binding(op, r),
            )
            .await?;
        match binding {
            Some(binding) => Ok(Some(self.with_credentials(binding).await?)),
            None => Ok(None),
        }
    }

    async fn get_binding_by_name(&self, name: &str) -> Result<Option<Binding>, Error> {
        let op = "get binding by name";
        let space_id = self.space_id()?;
        self.single_by_name(
            op,
            "/v3/service_credential_bindings",
            name,
            &[("space_guids", space_id)],
            |r| parse_binding(op, r),
        )
        .await
    }

    async fn list_bindings(&self) -> Result<Vec<Binding>, Error> {
        let op = "list bindings";
        let space_id = self.space_id()?;
        self.list_paginated(
            op,
            "/v3/service_credential_bindings",
            &[("space_guids", space_id), ("label_selector", OWNER_LABEL)],
        )
        .await?
        .iter()
        .map(|r| parse_binding(op, r))
        .collect()
    }

    async fn create_binding(&self, request: &BindingRequest) -> Result<(), Error> {
        let mut body = json!({
            "type": "key",
            "name": request.name,
            "relationships": {
                "service_instance": { "data": { "guid": request.instance_id } },
            },
            "metadata": tracking_metadata(
                Some(&request.owner),
                Some(request.generation),
                Some(&request.parameter_hash),
            ),
        });
        if let Some(params) = &request.parameters {
            body["parameters"] = params.clone();
        }
        self.request(
            "create binding",
            reqwest::Method::POST,
            "/v3/service_credential_bindings",
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn update_binding(&self, id: &str, changes: &BindingChanges) -> Result<(), Error> {
        if changes.is_empty() {
            return Ok(());
        }
        let body = json!({
            "metadata": tracking_metadata(
                changes.owner.as_deref(),
                changes.generation,
                changes.parameter_hash.as_deref(),
            ),
        });
        self.request(
            "update binding",
            reqwest::Method::PATCH,
            &format!("/v3/service_credential_bindings/{id}"),
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_binding(&self, id: &str) -> Result<(), Error> {
        self.request(
            "delete binding",
            reqwest::Method::DELETE,
            &format!("/v3/service_credential_bindings/{id}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }
}

impl PlatformClient {
    /// Attach the credentials payload to a Ready binding
    async fn with_credentials(&self, mut binding: Binding) -> Result<Binding, Error> {
        if binding.state != RemoteState::Ready {
            return Ok(binding);
        }
        let op = "get binding details";
        let details = self
            .request(
                op,
                reqwest::Method::GET,
                &format!("/v3/service_credential_bindings/{}/details", binding.id),
                &[],
                None,
            )
            .await?;
        binding.credentials = details.and_then(|d| d.get("credentials").cloned());
        Ok(binding)
    }
}

#[async_trait]
impl HealthChecker for PlatformClient {
    async fn check(&self, space_id: &str) -> Result<(), Error> {
        let op = "health check";
        let result = self
            .request(
                op,
                reqwest::Method::GET,
                &format!("/v3/spaces/{space_id}"),
                &[],
                None,
            )
            .await?;
        if result.is_none() {
            return Err(Error::platform_fatal(
                op,
                format!("space {space_id} not found"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_space_extracts_tracking_metadata() {
        let resource = json!({
            "guid": "space-1",
            "name": "dev-space",
            "metadata": {
                "labels": { OWNER_LABEL: "uid-1234" },
                "annotations": { GENERATION_ANNOTATION: "3" }
            }
        });
        let space = parse_space("test", &resource).unwrap();
        assert_eq!(space.id, "space-1");
        assert_eq!(space.owner.as_deref(), Some("uid-1234"));
        assert_eq!(space.generation, Some(3));
    }

    #[test]
    fn test_parse_space_tolerates_unmanaged_records() {
        let resource = json!({ "guid": "space-2", "name": "manual-space" });
        let space = parse_space("test", &resource).unwrap();
        assert!(space.owner.is_none());
        assert!(space.generation.is_none());
    }

    #[test]
    fn test_parse_instance_maps_last_operation() {
        let resource = json!({
            "guid": "i-1",
            "name": "db",
            "tags": ["sql"],
            "last_operation": { "type": "create", "state": "in_progress" },
            "relationships": { "service_plan": { "data": { "guid": "plan-9" } } }
        });
        let instance = parse_instance("test", &resource).unwrap();
        assert_eq!(instance.state, RemoteState::Creating);
        assert_eq!(instance.plan_id.as_deref(), Some("plan-9"));
        assert_eq!(instance.tags, vec!["sql".to_string()]);
    }

    #[test]
    fn test_parse_instance_missing_guid_is_error() {
        let resource = json!({ "name": "db" });
        assert!(parse_instance("test", &resource).is_err());
    }

    #[test]
    fn test_next_page_url_follows_pagination_link() {
        let body = json!({
            "pagination": { "next": { "href": "https://api.example.com/v3/spaces?page=2" } },
            "resources": []
        });
        assert_eq!(
            next_page_url(&body).as_deref(),
            Some("https://api.example.com/v3/spaces?page=2")
        );
    }

    #[test]
    fn test_next_page_url_none_on_last_page() {
        let body = json!({
            "pagination": { "next": null },
            "resources": []
        });
        assert!(next_page_url(&body).is_none());
        assert!(next_page_url(&json!({ "resources": [] })).is_none());
    }

    #[test]
    fn test_tracking_metadata_stringifies_generation() {
        let meta = tracking_metadata(Some("uid"), Some(7), Some("abc"));
        assert_eq!(meta["labels"][OWNER_LABEL], "uid");
        assert_eq!(meta["annotations"][GENERATION_ANNOTATION], "7");
        assert_eq!(meta["annotations"][PARAMETER_HASH_ANNOTATION], "abc");
    }
}
