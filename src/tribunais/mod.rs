//! Tribunal descriptors and process-number routing.

mod router;

pub use router::{TribunalRouter, detectar_codigo_tribunal};

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ScraperResult;

/// E-justice portal family serving a tribunal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SistemaOrigem {
    Projudi,
    Esaj,
    Pje,
}

impl SistemaOrigem {
    /// Default `(login, consulta, certificate login)` paths of the portal
    /// family. `{numero}` is replaced by the canonical process number.
    fn default_paths(self) -> (&'static str, &'static str, &'static str) {
        match self {
            SistemaOrigem::Projudi => (
                "/projudi/usuario/logon.do",
                "/projudi/processo/buscaProcesso.do?numeroProcesso={numero}",
                "/projudi/usuario/logonCertificado.do",
            ),
            SistemaOrigem::Esaj => (
                "/sajcas/login",
                "/cpopg/search.do?cbPesquisa=NUMPROC&dadosConsulta.valorConsultaNuUnificado={numero}",
                "/sajcas/login?certificado=true",
            ),
            SistemaOrigem::Pje => (
                "/pje/login.seam",
                "/pje/ConsultaPublica/listView.seam?numeroProcesso={numero}",
                "/pje/authenticateCertificate.seam",
            ),
        }
    }
}

impl fmt::Display for SistemaOrigem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SistemaOrigem::Projudi => "PROJUDI",
            SistemaOrigem::Esaj => "ESAJ",
            SistemaOrigem::Pje => "PJE",
        };
        f.write_str(name)
    }
}

/// Resolved endpoint for one tribunal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tribunal {
    pub codigo: String,
    pub sistema: SistemaOrigem,
    pub base_url: Url,
    pub login_path: String,
    pub consulta_path: String,
    pub certificado_path: String,
}

impl Tribunal {
    pub fn new(codigo: impl Into<String>, sistema: SistemaOrigem, base_url: Url) -> Self {
        let (login, consulta, certificado) = sistema.default_paths();
        Self {
            codigo: codigo.into(),
            sistema,
            base_url,
            login_path: login.to_string(),
            consulta_path: consulta.to_string(),
            certificado_path: certificado.to_string(),
        }
    }

    pub fn login_url(&self) -> ScraperResult<Url> {
        Ok(self.base_url.join(&self.login_path)?)
    }

    pub fn certificado_url(&self) -> ScraperResult<Url> {
        Ok(self.base_url.join(&self.certificado_path)?)
    }

    pub fn consulta_url(&self, numero_canonico: &str) -> ScraperResult<Url> {
        let path = self.consulta_path.replace("{numero}", numero_canonico);
        Ok(self.base_url.join(&path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_consulta_url_from_template() {
        let tribunal = Tribunal::new(
            "TJSP",
            SistemaOrigem::Esaj,
            Url::parse("https://esaj.tjsp.jus.br").unwrap(),
        );
        let url = tribunal.consulta_url("1001234-88.2023.8.26.0100").unwrap();
        assert_eq!(url.host_str(), Some("esaj.tjsp.jus.br"));
        assert!(url.as_str().contains("1001234-88.2023.8.26.0100"));
        assert_eq!(
            tribunal.login_url().unwrap().as_str(),
            "https://esaj.tjsp.jus.br/sajcas/login"
        );
    }
}
