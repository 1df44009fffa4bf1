use super::{BanditNormalizer, EnryNormalizer, GosecNormalizer, Normalizer};
use std::collections::HashMap;
use std::sync::Arc;

/// 按安全测试名称索引的 Normalizer 表
#[derive(Clone, Default)]
pub struct NormalizerRegistry {
    normalizers: HashMap<String, Arc<dyn Normalizer>>,
}

impl NormalizerRegistry {
    pub fn new() -> Self {
        Self {
            normalizers: HashMap::new(),
        }
    }

    /// enry + bandit + gosec
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EnryNormalizer::new());
        registry.register(BanditNormalizer::new());
        registry.register(GosecNormalizer::new());
        registry
    }

    pub fn register<N: Normalizer + 'static>(&mut self, normalizer: N) {
        self.normalizers.insert(normalizer.name(), Arc::new(normalizer));
    }

    pub fn get(&self, security_test: &str) -> Option<Arc<dyn Normalizer>> {
        self.normalizers.get(security_test).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.normalizers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_builtin_tests() {
        let registry = NormalizerRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["bandit", "enry", "gosec"]);
        assert!(registry.get("bandit").is_some());
        assert!(registry.get("brakeman").is_none());
    }
}
