/*
 * Kubeconfig-shaped credential documents, assembled from issued
 * certificate secrets.
 */
use crate::errors::Error;
use crate::store::ObjectStore;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TLS_CERT: &str = "tls.crt";
pub const TLS_KEY: &str = "tls.key";
pub const KUBECONFIG_KEY: &str = "kubeconfig";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub server: String,

    #[serde(rename = "certificate-authority-data")]
    pub certificate_authority_data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(rename = "client-certificate-data")]
    pub client_certificate_data: String,

    #[serde(rename = "client-key-data")]
    pub client_key_data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

/* One cluster, one user and one context binding them */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub clusters: Vec<NamedCluster>,

    pub contexts: Vec<NamedContext>,

    pub users: Vec<NamedUser>,

    #[serde(rename = "current-context")]
    pub current_context: String,
}

/* Certificate, key and the authority that verifies the server */
#[derive(Clone, Debug, PartialEq)]
pub struct Credential {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl KubeconfigDocument {

    pub fn new(cluster: &str, server: &str, user: &str, credential: &Credential) -> Self {
	Self{
	    api_version: String::from("v1"),
	    kind: String::from("Config"),
	    clusters: vec![NamedCluster{
		name: cluster.to_string(),
		cluster: ClusterEntry{
		    server: server.to_string(),
		    certificate_authority_data: STANDARD.encode(&credential.ca),
		},
	    }],
	    contexts: vec![NamedContext{
		name: cluster.to_string(),
		context: ContextEntry{ cluster: cluster.to_string(), user: user.to_string() },
	    }],
	    users: vec![NamedUser{
		name: user.to_string(),
		user: UserEntry{
		    client_certificate_data: STANDARD.encode(&credential.cert),
		    client_key_data: STANDARD.encode(&credential.key),
		},
	    }],
	    current_context: cluster.to_string(),
	}
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
	Ok(serde_yaml::to_string(self)?)
    }

    /* Data of the secret the document is stored in */
    pub fn secret_data(&self) -> Result<BTreeMap<String, ByteString>, Error> {
	let yaml = self.to_yaml()?;
	Ok(BTreeMap::from([(String::from(KUBECONFIG_KEY), ByteString(yaml.into_bytes()))]))
    }
}

pub fn secret_key(secret: &KubeSecret, key: &str) -> Result<Vec<u8>, Error> {
    let name = secret.metadata.name.clone().unwrap_or_default();

    secret.data.as_ref()
	.and_then(|data| data.get(key))
	.map(|value| value.0.clone())
	.filter(|value| !value.is_empty())
	.ok_or_else(|| Error::MissingData(format!("secret {} has no {}", name, key)))
}

/*
 * Reads the credential out of an issued certificate secret and the
 * authority secret of the server. None while either secret has not been
 * issued yet.
 */
pub async fn load(store: &dyn ObjectStore, namespace: &str, cert_secret: &str, ca_secret: &str) -> Result<Option<Credential>, Error> {
    let cert = match store.get_secret(namespace, cert_secret).await? {
	Some(secret) => secret,
	None => return Ok(None),
    };
    let ca = match store.get_secret(namespace, ca_secret).await? {
	Some(secret) => secret,
	None => return Ok(None),
    };

    Ok(Some(Credential{
	ca: secret_key(&ca, TLS_CERT)?,
	cert: secret_key(&cert, TLS_CERT)?,
	key: secret_key(&cert, TLS_KEY)?,
    }))
}

/*
 * The purpose authority's certificate followed by the user supplied bundle,
 * as stored in <owner>-merged-ca-bundle.
 */
pub fn merged_ca_bundle(authority: &KubeSecret, user_bundle: &KubeSecret) -> Result<BTreeMap<String, ByteString>, Error> {
    let mut merged = secret_key(authority, TLS_CERT)?;
    if !merged.ends_with(b"\n") {
	merged.push(b'\n');
    }
    merged.extend(secret_key(user_bundle, TLS_CERT)?);

    Ok(BTreeMap::from([(String::from(TLS_CERT), ByteString(merged))]))
}
