use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// 富文本文档，只解释 `image` 块
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentDocument {
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentBlock {
    pub fn is_image(&self) -> bool {
        self.kind == "image"
    }

    /// Token of a block that still waits for its uploaded file.
    pub fn upload_token(&self) -> Option<&str> {
        if !self.is_image() {
            return None;
        }
        self.data
            .get("file")
            .and_then(|file| file.get("uploadToken"))
            .and_then(Value::as_str)
    }

    pub fn image_id(&self) -> Option<&str> {
        if !self.is_image() {
            return None;
        }
        self.data
            .get("file")
            .and_then(|file| file.get("imageId"))
            .and_then(Value::as_str)
    }

    fn forget_image_id(&mut self) {
        if let Some(file) = self.data.get_mut("file").and_then(Value::as_object_mut) {
            file.remove("imageId");
        }
    }

    /// 用上传后的地址替换 uploadToken
    pub fn set_uploaded(&mut self, url: &str, image_id: &str) {
        let file = serde_json::json!({ "url": url, "imageId": image_id });
        match self.data.as_object_mut() {
            Some(data) => {
                data.insert("file".to_string(), file);
            }
            None => {
                self.data = serde_json::json!({ "file": file });
            }
        }
    }
}

impl ContentDocument {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn upload_tokens(&self) -> Vec<String> {
        self.blocks
            .iter()
            .filter_map(|b| b.upload_token().map(str::to_string))
            .collect()
    }

    pub fn image_ids(&self) -> BTreeSet<String> {
        self.blocks
            .iter()
            .filter_map(|b| b.image_id().map(str::to_string))
            .collect()
    }

    /// Strips every `imageId` not in `owned`. Returns how many were dropped.
    pub fn retain_image_ids(&mut self, owned: &BTreeSet<String>) -> usize {
        let mut dropped = 0;
        for block in self.blocks.iter_mut() {
            if block.image_id().map_or(false, |id| !owned.contains(id)) {
                block.forget_image_id();
                dropped += 1;
            }
        }
        dropped
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut ContentBlock> {
        self.blocks.iter_mut()
    }
}
