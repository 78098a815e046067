use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::pipeline::selector::CategoryWeights;
use crate::storage::models::{Author, Category};

/// config/categories.toml：分类权重与各分类的默认作者
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryConfig {
    /// 找不到匹配分类或作者时使用
    pub default_category: Category,
    pub weights: BTreeMap<String, f64>,
    pub authors: BTreeMap<String, Author>,
}

/// 按分类查找作者，缺失时回退到默认分类的作者
#[derive(Debug, Clone)]
pub struct AuthorDirectory {
    authors: HashMap<Category, Author>,
    fallback: Author,
}

impl CategoryConfig {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/categories.toml");

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: CategoryConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn weights(&self) -> Result<CategoryWeights> {
        let entries = keyed_by_category(&self.weights, "weights")?;
        CategoryWeights::new(entries.into_iter().map(|(c, w)| (c, *w)), self.default_category)
    }

    pub fn author_directory(&self) -> Result<AuthorDirectory> {
        let authors = keyed_by_category(&self.authors, "authors")?
            .into_iter()
            .map(|(c, a)| (c, a.clone()))
            .collect();
        AuthorDirectory::new(authors, self.default_category)
    }
}

impl AuthorDirectory {
    pub fn new(authors: HashMap<Category, Author>, default_category: Category) -> Result<Self> {
        let Some(fallback) = authors.get(&default_category).cloned() else {
            bail!("默认分类 {} 没有配置作者", default_category.id());
        };
        Ok(Self { authors, fallback })
    }

    pub fn resolve(&self, category: Category) -> &Author {
        self.authors.get(&category).unwrap_or(&self.fallback)
    }
}

/// 键可以是分类标识或波斯语标签，同一分类出现两次视为配置错误
fn keyed_by_category<'a, V>(
    table: &'a BTreeMap<String, V>,
    section: &str,
) -> Result<HashMap<Category, &'a V>> {
    let mut entries = HashMap::with_capacity(table.len());
    for (key, value) in table {
        let category = key.parse::<Category>()?;
        if entries.insert(category, value).is_some() {
            bail!("[{}] 中分类 {} 重复配置", section, category.id());
        }
    }
    Ok(entries)
}

fn author(id: &str, name: &str, role: &str, seed: &str) -> Author {
    Author {
        id: id.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        avatar_url: format!("https://picsum.photos/seed/{}/100/100", seed),
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        // 热门分类权重更高
        let weights = [
            (Category::Tech, 0.3),
            (Category::Cinema, 0.25),
            (Category::Games, 0.2),
            (Category::Cooking, 0.1),
            (Category::Tourism, 0.1),
            (Category::Science, 0.05),
        ]
        .into_iter()
        .map(|(c, w)| (c.id().to_string(), w))
        .collect();

        let authors = [
            (Category::Tech, author("a1", "آرش مهندس", "سردبیر تکنولوژی", "arash")),
            (Category::Cinema, author("a2", "سارا سینما", "منتقد فیلم", "sara")),
            (Category::Games, author("a3", "نیما گیمر", "کارشناس بازی", "nima")),
            (Category::Cooking, author("a4", "مریم بانو", "سرآشپز", "maryam")),
            (Category::Tourism, author("a5", "کامران جهانگرد", "راهنمای سفر", "kamran")),
            (Category::Science, author("a6", "دکتر دانش", "پژوهشگر", "dr")),
        ]
        .into_iter()
        .map(|(c, a)| (c.id().to_string(), a))
        .collect();

        Self {
            default_category: Category::Tech,
            weights,
            authors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CategoryConfig::default();
        assert!(config.weights().is_ok());
        let directory = config.author_directory().unwrap();
        assert_eq!(directory.resolve(Category::Cinema).id, "a2");
    }

    #[test]
    fn survives_toml_round_trip() {
        let text = toml::to_string_pretty(&CategoryConfig::default()).unwrap();
        let parsed: CategoryConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.default_category, Category::Tech);
        assert_eq!(parsed.weights.get("games"), Some(&0.2));
        assert_eq!(parsed.authors["science"].name, "دکتر دانش");
    }

    #[test]
    fn missing_author_falls_back_to_default_category() {
        let mut config = CategoryConfig::default();
        config.authors.remove("cooking");
        let directory = config.author_directory().unwrap();
        assert_eq!(directory.resolve(Category::Cooking).id, "a1");
    }

    #[test]
    fn default_category_must_have_author() {
        let mut config = CategoryConfig::default();
        config.authors.remove("tech");
        assert!(config.author_directory().is_err());
    }

    #[test]
    fn same_category_under_id_and_label_is_rejected() {
        let mut config = CategoryConfig::default();
        config
            .weights
            .insert(Category::Tech.label().to_string(), 0.9);
        assert!(config.weights().is_err());

        let mut config = CategoryConfig::default();
        let extra = config.authors["cinema"].clone();
        config.authors.insert(Category::Cinema.label().to_string(), extra);
        assert!(config.author_directory().is_err());
    }

    #[test]
    fn unknown_weight_key_is_rejected() {
        let mut config = CategoryConfig::default();
        config.weights.insert("sports".to_string(), 0.5);
        assert!(config.weights().is_err());
    }
}
