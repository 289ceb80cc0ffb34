use crate::error::Error;
use std::fmt;

/// A single `{typeSegment}/{nameSegment}` pair, e.g. `providers/Applications.Core/containers/web`
/// is represented internally as `("Applications.Core/containers", "web")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TypeName {
    type_segment: String,
    name_segment: String,
}

/// An ARM-style hierarchical resource identifier.
///
/// ```text
/// /planes/{planeType}/{planeName}/resourceGroups/{rg}/providers/{ns}/{type}/{name}
/// /planes/{planeType}/{planeName}/providers/{ns}/{type}/{name}
/// /planes/{planeType}/{planeName}
/// /planes/{planeType}/{planeName}/resourceGroups/{rg}
/// ```
///
/// Segment keys are normalized to lowercase for comparison; the original
/// case is retained for display, matching ARM's own convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceID {
    plane_type: String,
    plane_name: String,
    resource_group: Option<String>,
    provider_namespace: Option<String>,
    types: Vec<TypeName>,
}

impl ResourceID {
    pub fn try_parse(input: &str) -> Result<Self, Error> {
        let segments: Vec<&str> = input.split('/').collect();
        // A valid id always starts with an empty segment (leading slash).
        if segments.first().map(|s| !s.is_empty()).unwrap_or(true) {
            return Err(Error::InvalidId(format!("missing leading slash: {input}")));
        }
        let segments = &segments[1..];
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::InvalidId(format!(
                "empty or whitespace-only segment in: {input}"
            )));
        }
        if segments.len() < 3 || !segments[0].eq_ignore_ascii_case("planes") {
            return Err(Error::InvalidId(format!(
                "expected /planes/{{type}}/{{name}}/... got: {input}"
            )));
        }
        let plane_type = segments[1].to_owned();
        let plane_name = segments[2].to_owned();
        let mut rest = &segments[3..];

        let mut resource_group = None;
        if rest.first().map(|s| s.eq_ignore_ascii_case("resourceGroups")) == Some(true) {
            let name = rest
                .get(1)
                .ok_or_else(|| Error::InvalidId(format!("dangling resourceGroups segment: {input}")))?;
            resource_group = Some((*name).to_owned());
            rest = &rest[2..];
        }

        let mut provider_namespace = None;
        let mut types = Vec::new();
        if !rest.is_empty() {
            if !rest[0].eq_ignore_ascii_case("providers") {
                return Err(Error::InvalidId(format!(
                    "expected providers segment, got: {input}"
                )));
            }
            let ns = rest
                .get(1)
                .ok_or_else(|| Error::InvalidId(format!("dangling providers segment: {input}")))?;
            provider_namespace = Some((*ns).to_owned());
            let type_name_segments = &rest[2..];
            if type_name_segments.is_empty() || type_name_segments.len() % 2 != 0 {
                return Err(Error::InvalidId(format!(
                    "type/name segment count mismatch in: {input}"
                )));
            }
            for pair in type_name_segments.chunks(2) {
                types.push(TypeName {
                    type_segment: pair[0].to_owned(),
                    name_segment: pair[1].to_owned(),
                });
            }
        }

        Ok(ResourceID {
            plane_type,
            plane_name,
            resource_group,
            provider_namespace,
            types,
        })
    }

    /// Panics on malformed input. Only for ids known valid ahead of time
    /// (test fixtures, compile-time literals); anything built from untrusted
    /// input (HTTP path segments, request bodies) must go through
    /// `try_parse`/`FromStr` instead.
    pub fn parse(input: &str) -> Self {
        Self::try_parse(input).expect("valid resource id")
    }

    /// True for plane- or resource-group-scope ids with no provider segment.
    pub fn is_scope_id(&self) -> bool {
        self.provider_namespace.is_none()
    }

    pub fn plane_type(&self) -> &str {
        &self.plane_type
    }

    pub fn plane_name(&self) -> &str {
        &self.plane_name
    }

    pub fn resource_group(&self) -> Option<&str> {
        self.resource_group.as_deref()
    }

    pub fn provider_namespace(&self) -> Option<&str> {
        self.provider_namespace.as_deref()
    }

    /// Fully-qualified type, e.g. `Applications.Core/containers` or, for a
    /// nested child, `Applications.Core/environments/gateways`.
    pub fn resource_type(&self) -> Option<String> {
        self.provider_namespace.as_ref().map(|ns| {
            let type_segments: Vec<&str> = self
                .types
                .iter()
                .map(|t| t.type_segment.as_str())
                .collect();
            format!("{ns}/{}", type_segments.join("/"))
        })
    }

    /// The last name segment, i.e. the resource's own name.
    pub fn name(&self) -> Option<&str> {
        self.types.last().map(|t| t.name_segment.as_str())
    }

    /// The id of the plane this resource lives under, with no resource
    /// group or provider segment.
    pub fn plane_id(&self) -> ResourceID {
        ResourceID {
            plane_type: self.plane_type.clone(),
            plane_name: self.plane_name.clone(),
            resource_group: None,
            provider_namespace: None,
            types: Vec::new(),
        }
    }

    /// The id one level up: the resource group scope for a top-level
    /// resource, or the parent resource for a nested one.
    pub fn parent(&self) -> Option<ResourceID> {
        if self.types.len() > 1 {
            let mut parent = self.clone();
            parent.types.pop();
            Some(parent)
        } else if !self.types.is_empty() {
            Some(ResourceID {
                plane_type: self.plane_type.clone(),
                plane_name: self.plane_name.clone(),
                resource_group: self.resource_group.clone(),
                provider_namespace: None,
                types: Vec::new(),
            })
        } else {
            None
        }
    }

    /// Appends a new `{typeSegment}/{name}` pair, forming a child resource id.
    pub fn append(&self, type_segment: &str, name: &str) -> ResourceID {
        let mut child = self.clone();
        child.types.push(TypeName {
            type_segment: type_segment.to_owned(),
            name_segment: name.to_owned(),
        });
        child
    }

    /// Case-insensitive normalized key suitable for use as a store key and
    /// for equality comparisons across differently-cased input.
    pub fn normalize(&self) -> String {
        self.to_string().to_lowercase()
    }

    /// The normalized ARM scope this id routes through (used by the UCP
    /// router to pick a plane/resourceGroup handler).
    pub fn routing_scope(&self) -> String {
        format!("/planes/{}/{}", self.plane_type, self.plane_name)
    }
}

impl fmt::Display for ResourceID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/planes/{}/{}", self.plane_type, self.plane_name)?;
        if let Some(rg) = &self.resource_group {
            write!(f, "/resourceGroups/{rg}")?;
        }
        if let Some(ns) = &self.provider_namespace {
            write!(f, "/providers/{ns}")?;
            for t in &self.types {
                write!(f, "/{}/{}", t.type_segment, t.name_segment)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for ResourceID {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_full_id() {
        let raw = "/planes/radius/local/resourceGroups/default/providers/Applications.Core/containers/web";
        let id = ResourceID::try_parse(raw).unwrap();
        let reparsed = ResourceID::try_parse(&id.to_string()).unwrap();
        assert_eq!(id, reparsed);
        assert_eq!(id.name(), Some("web"));
        assert_eq!(
            id.resource_type().as_deref(),
            Some("Applications.Core/containers")
        );
    }

    #[test]
    fn round_trips_a_plane_scope_id() {
        let raw = "/planes/radius/local";
        let id = ResourceID::try_parse(raw).unwrap();
        assert!(id.is_scope_id());
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn rejects_empty_segment() {
        let raw = "/planes/radius//resourceGroups/default";
        assert!(ResourceID::try_parse(raw).is_err());
    }

    #[test]
    fn rejects_missing_leading_slash() {
        assert!(ResourceID::try_parse("planes/radius/local").is_err());
    }

    #[test]
    fn rejects_mismatched_type_name_segments() {
        let raw = "/planes/radius/local/providers/Applications.Core/containers";
        assert!(ResourceID::try_parse(raw).is_err());
    }

    #[test]
    fn parent_of_nested_resource_drops_one_level() {
        let raw = "/planes/radius/local/resourceGroups/default/providers/Applications.Core/environments/env0/gateways/gw0";
        let id = ResourceID::try_parse(raw).unwrap();
        let parent = id.parent().unwrap();
        assert_eq!(
            parent.to_string(),
            "/planes/radius/local/resourceGroups/default/providers/Applications.Core/environments/env0"
        );
    }

    #[test]
    fn normalize_is_case_insensitive() {
        let a = ResourceID::try_parse("/planes/Radius/Local/resourceGroups/Default").unwrap();
        let b = ResourceID::try_parse("/planes/radius/local/resourcegroups/default").unwrap();
        assert_eq!(a.normalize(), b.normalize());
    }

    #[test]
    fn append_builds_a_child_id() {
        let base = ResourceID::try_parse("/planes/radius/local/resourceGroups/default").unwrap();
        let child = base.append("Applications.Core/containers", "web");
        assert_eq!(
            child.to_string(),
            "/planes/radius/local/resourceGroups/default/providers/Applications.Core/containers/web"
        );
    }
}
