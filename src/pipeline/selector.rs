use anyhow::{bail, Result};
use rand::Rng;

use crate::storage::models::Category;

/// 分类权重表，按比例解释，不要求总和为 1
#[derive(Debug, Clone)]
pub struct CategoryWeights {
    /// 按 Category::ALL 的顺序排列
    entries: Vec<(Category, f64)>,
    total: f64,
    default_category: Category,
}

impl CategoryWeights {
    pub fn new(
        entries: impl IntoIterator<Item = (Category, f64)>,
        default_category: Category,
    ) -> Result<Self> {
        let entries: Vec<(Category, f64)> = entries.into_iter().collect();

        let mut ordered = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let Some(&(_, weight)) = entries.iter().find(|(c, _)| *c == category) else {
                bail!("分类 {} 缺少权重", category.id());
            };
            if !weight.is_finite() || weight < 0.0 {
                bail!("分类 {} 的权重无效: {}", category.id(), weight);
            }
            ordered.push((category, weight));
        }

        let total: f64 = ordered.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            bail!("至少需要一个正权重");
        }

        Ok(Self {
            entries: ordered,
            total,
            default_category,
        })
    }

    /// 只有一个分类有权重
    pub fn only(category: Category) -> Self {
        Self {
            entries: Category::ALL
                .into_iter()
                .map(|c| (c, if c == category { 1.0 } else { 0.0 }))
                .collect(),
            total: 1.0,
            default_category: category,
        }
    }
}

/// 加权随机选择分类
#[derive(Debug, Clone)]
pub struct CategorySelector {
    weights: CategoryWeights,
}

impl CategorySelector {
    pub fn new(weights: CategoryWeights) -> Self {
        Self { weights }
    }

    pub fn pick<R: Rng>(&self, rng: &mut R) -> Category {
        self.pick_with(rng.gen::<f64>())
    }

    /// 给定 [0,1) 内的均匀抽样值选择分类，相同输入总是得到相同结果
    pub fn pick_with(&self, draw: f64) -> Category {
        let target = draw * self.weights.total;
        let mut sum = 0.0;
        for &(category, weight) in &self.weights.entries {
            sum += weight;
            if target < sum {
                return category;
            }
        }
        // 浮点累加误差导致未命中
        self.weights.default_category
    }
}
