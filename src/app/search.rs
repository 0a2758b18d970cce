use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::app::types::{App, FilteredHost, InputMode};

impl App {
    pub fn enter_search_mode(&mut self) {
        self.input_mode = InputMode::Search;
        self.search_query.clear();
        self.search_selected = 0;
        self.filter_hosts();
    }

    /// Leave search and go back to the folder view.
    pub fn clear_search(&mut self) {
        self.search_query.clear();
        self.input_mode = InputMode::Normal;
        self.filtered_hosts.clear();
        self.search_selected = 0;
        self.update_hosts_for_selected_folder();
    }

    /// Fuzzy-match the query against host names across all folders. Hosts
    /// whose name does not match but whose address does are kept with no
    /// highlighted characters.
    pub fn filter_hosts(&mut self) {
        let matcher = SkimMatcherV2::default();
        let query = self.search_query.trim();

        let mut results: Vec<FilteredHost> = self
            .registry
            .hosts()
            .filter_map(|host| {
                if query.is_empty() {
                    return Some(FilteredHost {
                        name: host.name.clone(),
                        score: 0,
                        matched_indices: Vec::new(),
                    });
                }
                if let Some((score, indices)) = matcher.fuzzy_indices(&host.name, query) {
                    return Some(FilteredHost {
                        name: host.name.clone(),
                        score,
                        matched_indices: indices,
                    });
                }
                matcher
                    .fuzzy_match(&host.host, query)
                    .map(|score| FilteredHost {
                        name: host.name.clone(),
                        score,
                        matched_indices: Vec::new(),
                    })
            })
            .collect();

        results.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        self.filtered_hosts = results;

        // Reset selection if current selection is out of bounds
        if self.search_selected >= self.filtered_hosts.len() {
            self.search_selected = 0;
        }
        self.host_list_state.select(if self.filtered_hosts.is_empty() {
            None
        } else {
            Some(self.search_selected)
        });
    }

    pub fn search_push(&mut self, c: char) {
        self.search_query.push(c);
        self.search_selected = 0;
        self.filter_hosts();
    }

    pub fn search_pop(&mut self) {
        self.search_query.pop();
        self.filter_hosts();
    }

    pub fn search_select_next(&mut self) {
        if self.filtered_hosts.is_empty() {
            return;
        }
        self.search_selected = (self.search_selected + 1) % self.filtered_hosts.len();
        self.host_list_state.select(Some(self.search_selected));
    }

    pub fn search_select_previous(&mut self) {
        if self.filtered_hosts.is_empty() {
            return;
        }
        let total = self.filtered_hosts.len();
        self.search_selected = (self.search_selected + total - 1) % total;
        self.host_list_state.select(Some(self.search_selected));
    }
}
