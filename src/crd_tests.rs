// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#[cfg(test)]
mod tests {
    use crate::crd::*;
    use kube::{CustomResourceExt, Resource};

    fn condition(status: &str) -> Condition {
        Condition {
            r#type: "Ready".into(),
            status: status.into(),
            reason: Some("Converged".into()),
            message: None,
            last_transition_time: None,
        }
    }

    #[test]
    fn test_tenant_is_cluster_scoped() {
        let crd = Tenant::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "multitenancy.example.com");
        assert_eq!(crd.spec.names.kind, "Tenant");
        assert_eq!(crd.spec.names.plural, "tenants");
    }

    #[test]
    fn test_tenant_kind_and_version() {
        assert_eq!(Tenant::kind(&()), "Tenant");
        assert_eq!(Tenant::api_version(&()), "multitenancy.example.com/v1");
    }

    #[test]
    fn test_desired_namespaces_deduplicates() {
        let tenant = Tenant::new(
            "acme",
            TenantSpec {
                namespaces: vec!["acme-prod".into(), "acme-dev".into(), "acme-prod".into()],
            },
        );

        let desired: Vec<String> = tenant.desired_namespaces().into_iter().collect();
        assert_eq!(desired, vec!["acme-dev".to_string(), "acme-prod".to_string()]);
    }

    #[test]
    fn test_ready_condition_lookup() {
        let mut tenant = Tenant::new("acme", TenantSpec { namespaces: vec!["a".into()] });
        assert!(tenant.ready_condition().is_none());

        tenant.status = Some(TenantStatus {
            conditions: vec![condition("True")],
            observed_generation: Some(1),
            namespaces: vec!["a".into()],
        });
        assert_eq!(tenant.ready_condition().map(|c| c.status.as_str()), Some("True"));
    }

    #[test]
    fn test_spec_deserializes_from_yaml() {
        let yaml = r"
apiVersion: multitenancy.example.com/v1
kind: Tenant
metadata:
  name: acme
spec:
  namespaces:
    - acme-dev
    - acme-prod
";
        let tenant: Tenant = serde_yaml::from_str(yaml).expect("tenant should parse");
        assert_eq!(tenant.spec.namespaces, vec!["acme-dev", "acme-prod"]);
        assert!(tenant.status.is_none());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = TenantStatus {
            conditions: vec![condition("True")],
            observed_generation: Some(3),
            namespaces: vec!["acme-dev".into()],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["observedGeneration"], 3);
        assert_eq!(json["conditions"][0]["type"], "Ready");
        assert!(json["conditions"][0].get("lastTransitionTime").is_none());
    }

    #[test]
    fn test_status_conditions_are_documented_in_schema() {
        let crd = serde_json::to_value(Tenant::crd()).unwrap();
        let conditions = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]
            ["status"]["properties"]["conditions"];
        let description = conditions["description"].as_str().unwrap_or_default();
        assert!(description.contains("Ready"), "got {conditions}");
    }
}
