use futures::TryStreamExt;
use reqwest::Method;
use serde_json::Value;

use super::PanelApi;
use crate::error::{ApiError, ApiErrorKind};
use crate::transport::query;
use crate::types::{attributes, EggDefinition};

#[derive(serde::Deserialize)]
struct NestId {
    id: u64,
}

impl PanelApi {
    async fn nest_ids(&self) -> Result<Vec<u64>, ApiError> {
        self.stream("nests", Vec::new())
            .and_then(|obj| async move { attributes::<NestId>(&obj).map(|n| n.id) })
            .try_collect()
            .await
    }

    pub async fn list_eggs(&self, nest_id: u64) -> Result<Vec<Value>, ApiError> {
        self.collect(&format!("nests/{nest_id}/eggs"), Vec::new())
            .await
    }

    /// Every egg of every nest, grouped in nest order.
    pub async fn list_all_eggs(&self) -> Result<Vec<Value>, ApiError> {
        let nests = self.nest_ids().await?;

        let mut eggs = Vec::new();
        for nest in nests {
            eggs.extend(self.list_eggs(nest).await?);
        }
        Ok(eggs)
    }

    /// Egg with its variables, ready for a provisioning run.
    pub async fn get_egg(&self, nest_id: u64, egg_id: u64) -> Result<EggDefinition, ApiError> {
        let body = self
            .request(
                Method::GET,
                &format!("nests/{nest_id}/eggs/{egg_id}"),
                None,
                &query([("include", "variables")]),
            )
            .await?;
        EggDefinition::from_object(&body)
    }

    /// Locate an egg when the caller does not know its nest.
    pub async fn find_egg(&self, egg_id: u64) -> Result<EggDefinition, ApiError> {
        let nests = self.nest_ids().await?;

        for nest in nests {
            match self.get_egg(nest, egg_id).await {
                Ok(egg) => return Ok(egg),
                Err(e) if e.kind == ApiErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ApiError::new(
            ApiErrorKind::NotFound,
            None,
            format!("egg {egg_id} not found in any nest"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn nests() -> Value {
        json!({"data": [{"attributes": {"id": 1}}, {"attributes": {"id": 2}}]})
    }

    #[tokio::test]
    async fn test_list_all_eggs_in_nest_order() {
        let fake = Arc::new(FakeTransport::new());
        fake.on_get("nests", Ok(nests()));
        fake.on_get("nests/1/eggs", Ok(json!({"data": [{"attributes": {"id": 10}}]})));
        fake.on_get(
            "nests/2/eggs",
            Ok(json!({"data": [{"attributes": {"id": 20}}, {"attributes": {"id": 21}}]})),
        );
        let api = PanelApi::new(fake, 100);

        let eggs = api.list_all_eggs().await.unwrap();
        let ids: Vec<u64> = eggs
            .iter()
            .map(|e| e["attributes"]["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![10, 20, 21]);
    }

    #[tokio::test]
    async fn test_find_egg_skips_missing_nests() {
        let fake = Arc::new(FakeTransport::new());
        fake.on_get("nests", Ok(nests()));
        fake.on_get(
            "nests/2/eggs/3",
            Ok(json!({"attributes": {"id": 3, "nest": 2, "name": "Paper", "startup": "java"}})),
        );
        let api = PanelApi::new(fake.clone(), 100);

        let egg = api.find_egg(3).await.unwrap();
        assert_eq!(egg.nest_id, 2);
        assert_eq!(fake.count(&Method::GET, "nests/1/eggs/3"), 1);
        let call = fake
            .calls()
            .into_iter()
            .find(|c| c.path == "nests/2/eggs/3")
            .unwrap();
        assert_eq!(call.query, vec![("include".to_string(), "variables".to_string())]);
    }

    #[tokio::test]
    async fn test_find_egg_not_found() {
        let fake = Arc::new(FakeTransport::new());
        fake.on_get("nests", Ok(nests()));
        let api = PanelApi::new(fake, 100);

        let err = api.find_egg(99).await.unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::NotFound);
    }
}
