//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构。
//!
//! 图以注册顺序为索引存储节点，所有遍历（循环检测、拓扑排序）都按注册顺序进行，
//! 因此同一组注册总是得到同一个初始化顺序。
//!
//! # 示例
//!
//! ```rust
//! use chips_init::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_module("tdep");
//! graph.add_module("tbase");
//! graph.add_dependency("tdep", "tbase");
//!
//! assert_eq!(graph.get_dependencies("tdep"), vec!["tbase".to_string()]);
//! assert_eq!(graph.topological_sort().unwrap(), vec!["tbase", "tdep"]);
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::utils::{CoreError, Result};

/// 模块依赖关系图
///
/// 用于表示和管理模块之间的依赖关系。
/// 支持循环依赖检测和确定性的拓扑排序。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 模块 ID -> 节点下标
    index: HashMap<String, usize>,
    /// 节点下标 -> 模块 ID（即注册顺序）
    nodes: Vec<String>,
    /// 正向边：节点 -> 该节点依赖的节点
    edges: Vec<Vec<usize>>,
    /// 反向边：节点 -> 依赖该节点的节点
    reverse_edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加模块节点到图中
    ///
    /// 如果模块已存在，则不会重复添加。
    ///
    /// # 返回
    ///
    /// 模块的节点下标
    pub fn add_module(&mut self, module_id: &str) -> usize {
        if let Some(&idx) = self.index.get(module_id) {
            return idx;
        }

        let idx = self.nodes.len();
        self.index.insert(module_id.to_string(), idx);
        self.nodes.push(module_id.to_string());
        self.edges.push(Vec::new());
        self.reverse_edges.push(Vec::new());
        idx
    }

    /// 添加依赖关系
    ///
    /// 表示 `module_id` 依赖于 `dependency_id`。
    /// 如果模块不存在，会自动添加。
    ///
    /// # 示例
    ///
    /// ```rust
    /// use chips_init::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_dependency("module_a", "module_b");
    ///
    /// assert!(graph.get_dependencies("module_a").contains(&"module_b".to_string()));
    /// assert!(graph.get_dependents("module_b").contains(&"module_a".to_string()));
    /// ```
    pub fn add_dependency(&mut self, module_id: &str, dependency_id: &str) {
        let from = self.add_module(module_id);
        let to = self.add_module(dependency_id);

        // 避免重复边
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
        if !self.reverse_edges[to].contains(&from) {
            self.reverse_edges[to].push(from);
        }
    }

    /// 获取模块的直接依赖列表（按声明顺序）
    pub fn get_dependencies(&self, module_id: &str) -> Vec<String> {
        self.index
            .get(module_id)
            .map(|&idx| self.names(&self.edges[idx]))
            .unwrap_or_default()
    }

    /// 获取依赖该模块的模块列表
    pub fn get_dependents(&self, module_id: &str) -> Vec<String> {
        self.index
            .get(module_id)
            .map(|&idx| self.names(&self.reverse_edges[idx]))
            .unwrap_or_default()
    }

    /// 查找循环依赖路径
    ///
    /// 使用深度优先搜索，按注册顺序遍历节点。
    ///
    /// # 返回
    ///
    /// 如果存在循环，返回闭合的循环路径（首尾为同一模块）；否则返回 `None`
    ///
    /// # 示例
    ///
    /// ```rust
    /// use chips_init::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_dependency("a", "b");
    /// graph.add_dependency("b", "a");
    ///
    /// assert_eq!(graph.find_cycle().unwrap(), vec!["a", "b", "a"]);
    /// ```
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        // 显式栈：(节点, 下一个待访问的出边下标)，长依赖链不会耗尽调用栈
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::OnStack;
            stack.push((root, 0));

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let Some(&neighbor) = self.edges[node].get(top.1) else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                };
                top.1 += 1;

                match marks[neighbor] {
                    Mark::Done => {}
                    Mark::OnStack => {
                        // 找到循环，从栈中截取
                        let start = stack.iter().position(|&(n, _)| n == neighbor)?;
                        let mut cycle: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                        cycle.push(neighbor);
                        return Some(self.names(&cycle));
                    }
                    Mark::Unvisited => {
                        marks[neighbor] = Mark::OnStack;
                        stack.push((neighbor, 0));
                    }
                }
            }
        }

        None
    }

    /// 拓扑排序（Kahn 算法）
    ///
    /// 返回模块的初始化顺序，保证依赖在依赖方之前。
    /// 多个模块同时就绪时，按注册顺序先后输出。
    ///
    /// # 错误
    ///
    /// 如果存在循环依赖，返回 `CoreError::CyclicDependency`。
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(CoreError::CyclicDependency { cycle });
        }

        // 入度 = 该节点尚未满足的依赖数量
        let mut in_degree: Vec<usize> = self.edges.iter().map(Vec::len).collect();

        // 小顶堆，按注册下标出队
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(node)) = ready.pop() {
            result.push(node);

            for &dependent in &self.reverse_edges[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if result.len() != self.nodes.len() {
            // 已经检测过循环，这里不应该发生
            return Err(CoreError::Internal("无法完成拓扑排序".to_string()));
        }

        Ok(self.names(&result))
    }

    /// 检查图是否为空
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 获取图中模块数量
    pub fn module_count(&self) -> usize {
        self.nodes.len()
    }

    /// 检查是否包含指定模块
    pub fn contains_module(&self, module_id: &str) -> bool {
        self.index.contains_key(module_id)
    }

    fn names(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| self.nodes[i].clone()).collect()
    }
}

/// DFS 访问标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_graph_new() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.module_count(), 0);
    }

    #[test]
    fn test_add_module_duplicate() {
        let mut graph = DependencyGraph::new();
        let first = graph.add_module("module_a");
        let second = graph.add_module("module_a");

        assert_eq!(first, second);
        assert_eq!(graph.module_count(), 1);
    }

    #[test]
    fn test_add_dependency() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("module_a", "module_b");

        assert!(graph.contains_module("module_a"));
        assert!(graph.contains_module("module_b"));
        assert_eq!(graph.get_dependencies("module_a"), vec!["module_b"]);
        assert_eq!(graph.get_dependents("module_b"), vec!["module_a"]);
    }

    #[test]
    fn test_add_dependency_duplicate() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("a", "b");

        assert_eq!(graph.get_dependencies("a").len(), 1);
        assert_eq!(graph.get_dependents("b").len(), 1);
    }

    #[test]
    fn test_unknown_module_queries() {
        let graph = DependencyGraph::new();
        assert!(graph.get_dependencies("nope").is_empty());
        assert!(graph.get_dependents("nope").is_empty());
    }

    #[test]
    fn test_find_cycle_acyclic_diamond() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "c");
        graph.add_dependency("a", "c");

        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_find_cycle_three_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "c");
        graph.add_dependency("c", "a");

        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_find_cycle_self_loop() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "a");

        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_find_cycle_excludes_tail() {
        // root -> x -> y -> x，root 不在循环中
        let mut graph = DependencyGraph::new();
        graph.add_dependency("root", "x");
        graph.add_dependency("x", "y");
        graph.add_dependency("y", "x");

        assert_eq!(graph.find_cycle().unwrap(), vec!["x", "y", "x"]);
    }

    #[test]
    fn test_topological_sort_simple() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("app", "service");
        graph.add_dependency("service", "database");

        assert_eq!(
            graph.topological_sort().unwrap(),
            vec!["database", "service", "app"]
        );
    }

    #[test]
    fn test_topological_sort_complex() {
        let mut graph = DependencyGraph::new();
        //     app
        //    /   \
        //   a     b
        //    \   /
        //      c
        //      |
        //      d
        graph.add_dependency("app", "a");
        graph.add_dependency("app", "b");
        graph.add_dependency("a", "c");
        graph.add_dependency("b", "c");
        graph.add_dependency("c", "d");

        let order = graph.topological_sort().unwrap();

        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("d") < pos("c"));
        assert!(pos("c") < pos("a"));
        assert!(pos("c") < pos("b"));
        assert!(pos("a") < pos("app"));
        assert!(pos("b") < pos("app"));
    }

    #[test]
    fn test_topological_sort_ties_follow_registration_order() {
        let mut graph = DependencyGraph::new();
        graph.add_module("zeta");
        graph.add_module("alpha");
        graph.add_module("mid");
        graph.add_dependency("mid", "zeta");

        // alpha 与 zeta 均无依赖，按注册顺序 zeta 在前；
        // mid 在 zeta 完成后就绪，但 alpha 注册更早
        assert_eq!(
            graph.topological_sort().unwrap(),
            vec!["zeta", "alpha", "mid"]
        );
    }

    #[test]
    fn test_topological_sort_is_deterministic() {
        let build = || {
            let mut graph = DependencyGraph::new();
            for id in ["m1", "m2", "m3", "m4", "m5"] {
                graph.add_module(id);
            }
            graph.add_dependency("m1", "m5");
            graph.add_dependency("m3", "m5");
            graph
        };

        let first = build().topological_sort().unwrap();
        for _ in 0..10 {
            assert_eq!(build().topological_sort().unwrap(), first);
        }
        assert_eq!(first, vec!["m2", "m4", "m5", "m1", "m3"]);
    }

    #[test]
    fn test_topological_sort_with_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "c");
        graph.add_dependency("c", "a");

        let result = graph.topological_sort();
        assert!(matches!(
            result.unwrap_err(),
            CoreError::CyclicDependency { cycle } if cycle.contains(&"a".to_string())
        ));
    }

    #[test]
    fn test_long_chain_does_not_overflow_stack() {
        const LEN: usize = 50_000;
        let mut graph = DependencyGraph::new();
        for i in 0..LEN {
            graph.add_module(&format!("m{}", i));
        }
        // 每个模块依赖前一个，DFS 从 m{LEN-1} 一路下探到 m0
        for i in (1..LEN).rev() {
            graph.add_dependency(&format!("m{}", i), &format!("m{}", i - 1));
        }

        assert!(graph.find_cycle().is_none());
        let order = graph.topological_sort().unwrap();
        assert_eq!(order.len(), LEN);
        assert_eq!(order.first().map(String::as_str), Some("m0"));
        assert_eq!(order.last().map(String::as_str), Some("m49999"));
    }

    #[test]
    fn test_long_chain_closing_cycle() {
        const LEN: usize = 50_000;
        let mut graph = DependencyGraph::new();
        for i in 1..LEN {
            graph.add_dependency(&format!("m{}", i - 1), &format!("m{}", i));
        }
        graph.add_dependency(&format!("m{}", LEN - 1), "m0");

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.len(), LEN + 1);
        assert_eq!(cycle.first(), cycle.last());
    }
}
