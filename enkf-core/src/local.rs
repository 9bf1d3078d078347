//! Local analysis configuration: which observations update which
//! parameters.

/// A named group, optionally restricted to some of its indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
  pub group: String,
  /// `None` selects the whole group.
  pub active: Option<Vec<usize>>,
}
impl Selection {
  pub fn all(group: &str) -> Selection {
    Selection {
      group: group.to_owned(),
      active: None,
    }
  }
  pub fn partly(group: &str, active: Vec<usize>) -> Selection {
    Selection {
      group: group.to_owned(),
      active: Some(active),
    }
  }

  pub fn selects(&self, index: usize) -> bool {
    match self.active {
      None => true,
      Some(ref active) => active.contains(&index),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDataset {
  pub name: String,
  pub observations: Vec<Selection>,
  pub parameters: Vec<Selection>,
  /// Row scaling applied to the correction; `None` means 1.
  pub scale: Option<f64>,
}
impl LocalDataset {
  pub fn new(name: &str) -> LocalDataset {
    LocalDataset {
      name: name.to_owned(),
      observations: Vec::new(),
      parameters: Vec::new(),
      scale: None,
    }
  }

  pub fn observe(mut self, group: &str) -> LocalDataset {
    self.observations.push(Selection::all(group));
    self
  }
  pub fn observe_partly(mut self, group: &str, active: Vec<usize>) -> LocalDataset {
    self.observations.push(Selection::partly(group, active));
    self
  }
  pub fn update(mut self, group: &str) -> LocalDataset {
    self.parameters.push(Selection::all(group));
    self
  }
  pub fn update_partly(mut self, group: &str, active: Vec<usize>) -> LocalDataset {
    self.parameters.push(Selection::partly(group, active));
    self
  }
  pub fn scaled(mut self, scale: f64) -> LocalDataset {
    self.scale = Some(scale);
    self
  }
}

pub trait LocalConfig: Sync {
  /// Datasets in the order they should be applied.
  fn get_datasets(&self) -> Vec<LocalDataset>;
}

/// One logical update pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateStep {
  pub name: String,
  pub datasets: Vec<LocalDataset>,
}
impl UpdateStep {
  pub fn new(name: &str) -> UpdateStep {
    UpdateStep {
      name: name.to_owned(),
      datasets: Vec::new(),
    }
  }
  pub fn with_dataset(mut self, dataset: LocalDataset) -> UpdateStep {
    self.datasets.push(dataset);
    self
  }
}
impl LocalConfig for UpdateStep {
  fn get_datasets(&self) -> Vec<LocalDataset> { self.datasets.clone() }
}
