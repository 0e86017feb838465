use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /*
     * The resource itself is malformed (e.g. a target with zero or several
     * references). Needs a spec change, so it is never retried blindly.
     */
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /* An object exists but lacks the data it is expected to carry */
    #[error("missing data: {0}")]
    MissingData(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{} errors occurred: {}", .0.len(), join(.0))]
    Multiple(Vec<Error>),
}

fn join(errors: &[Error]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<String>>().join("; ")
}

impl Error {

    /*
     * Folds errors collected from independent sub-steps into one result, so
     * that a failing sibling never hides the others.
     */
    pub fn aggregate(mut errors: Vec<Error>) -> Result<(), Error> {
	match errors.len() {
	    0 => Ok(()),
	    1 => Err(errors.remove(0)),
	    _ => Err(Error::Multiple(errors)),
	}
    }

    /* Value of a sub-step, its error going to the collector instead */
    pub fn collect<T>(result: Result<T, Error>, errors: &mut Vec<Error>) -> Option<T> {
	match result {
	    Ok(value) => Some(value),
	    Err(err) => {
		errors.push(err);
		None
	    },
	}
    }

    pub fn is_invalid_spec(&self) -> bool {
	match self {
	    Error::InvalidSpec(_) => true,
	    Error::Multiple(errors) => !errors.is_empty() && errors.iter().all(|e| e.is_invalid_spec()),
	    _ => false,
	}
    }

    pub fn is_conflict(&self) -> bool {
	matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 409)
    }
}
