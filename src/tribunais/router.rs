//! Maps canonical CNJ numbers to tribunal endpoints.
//!
//! The `J` (branch) and `TR` (court) segments identify the tribunal. Only
//! tribunals present in the endpoint table are routable; anything else is
//! reported as undetected instead of falling back to a guess.

use std::collections::HashMap;

use url::Url;

use super::{SistemaOrigem, Tribunal};
use crate::error::{ScraperError, ScraperResult};
use crate::utils::segmentos_cnj;

/// State courts in CNJ `TR` order (01 = AC … 27 = TO).
const UF_POR_TR: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB",
    "PR", "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SE", "SP", "TO",
];

const DEFAULT_ENDPOINTS: &[(&str, SistemaOrigem, &str)] = &[
    ("TRF1", SistemaOrigem::Pje, "https://pje1g.trf1.jus.br"),
    ("TRF3", SistemaOrigem::Pje, "https://pje1g.trf3.jus.br"),
    ("TRF5", SistemaOrigem::Pje, "https://pje.trf5.jus.br"),
    ("TRF6", SistemaOrigem::Pje, "https://pje1g.trf6.jus.br"),
    ("TJSP", SistemaOrigem::Esaj, "https://esaj.tjsp.jus.br"),
    ("TJAC", SistemaOrigem::Esaj, "https://esaj.tjac.jus.br"),
    ("TJAL", SistemaOrigem::Esaj, "https://www2.tjal.jus.br"),
    ("TJAM", SistemaOrigem::Esaj, "https://consultasaj.tjam.jus.br"),
    ("TJCE", SistemaOrigem::Esaj, "https://esaj.tjce.jus.br"),
    ("TJMS", SistemaOrigem::Esaj, "https://esaj.tjms.jus.br"),
    ("TJGO", SistemaOrigem::Projudi, "https://projudi.tjgo.jus.br"),
    ("TJPR", SistemaOrigem::Projudi, "https://projudi.tjpr.jus.br"),
    ("TJBA", SistemaOrigem::Projudi, "https://projudi.tjba.jus.br"),
    ("TJRR", SistemaOrigem::Projudi, "https://projudi.tjrr.jus.br"),
    ("TJMG", SistemaOrigem::Pje, "https://pje.tjmg.jus.br"),
    ("TJPE", SistemaOrigem::Pje, "https://pje.tjpe.jus.br"),
    ("TJDFT", SistemaOrigem::Pje, "https://pje.tjdft.jus.br"),
];

/// Derives the tribunal code (`TRF1`, `TJGO`, `TRT2`…) from a canonical
/// number, without consulting any endpoint table.
pub fn detectar_codigo_tribunal(numero_canonico: &str) -> ScraperResult<String> {
    let undetected = || ScraperError::TribunalNaoDetectado {
        numero: numero_canonico.to_string(),
    };
    let seg = segmentos_cnj(numero_canonico).ok_or_else(|| {
        ScraperError::Validation(format!("'{numero_canonico}' is not a canonical CNJ number"))
    })?;
    let tr: usize = seg.tribunal.parse().map_err(|_| undetected())?;

    match seg.justica {
        "4" if (1..=6).contains(&tr) => Ok(format!("TRF{tr}")),
        "5" if (1..=24).contains(&tr) => Ok(format!("TRT{tr}")),
        "8" => match tr.checked_sub(1).and_then(|idx| UF_POR_TR.get(idx)) {
            Some(&"DF") => Ok("TJDFT".to_string()),
            Some(uf) => Ok(format!("TJ{uf}")),
            None => Err(undetected()),
        },
        _ => Err(undetected()),
    }
}

/// Static `{tribunal code -> endpoint}` table plus an optional global base
/// URL override.
#[derive(Debug, Clone)]
pub struct TribunalRouter {
    endpoints: HashMap<String, Tribunal>,
    base_url_override: Option<Url>,
}

impl TribunalRouter {
    /// Router preloaded with the built-in endpoint table.
    pub fn new() -> Self {
        let mut router = Self::empty();
        for (codigo, sistema, base) in DEFAULT_ENDPOINTS {
            if let Ok(url) = Url::parse(base) {
                router.register(Tribunal::new(*codigo, *sistema, url));
            }
        }
        router
    }

    pub fn empty() -> Self {
        Self {
            endpoints: HashMap::new(),
            base_url_override: None,
        }
    }

    pub fn register(&mut self, tribunal: Tribunal) {
        self.endpoints
            .insert(tribunal.codigo.to_uppercase(), tribunal);
    }

    /// Every resolved tribunal is served from `base_url` instead of the
    /// table's host.
    pub fn with_base_url_override(mut self, base_url: Option<Url>) -> Self {
        self.base_url_override = base_url;
        self
    }

    pub fn get(&self, codigo: &str) -> Option<Tribunal> {
        self.endpoints
            .get(&codigo.trim().to_uppercase())
            .cloned()
            .map(|tribunal| self.apply_override(tribunal))
    }

    /// Resolves the endpoint for a canonical number.
    ///
    /// With an explicit code, the code must be registered and must agree with
    /// the detected tribunal whenever detection succeeds.
    pub fn resolver(&self, numero_canonico: &str, explicito: Option<&str>) -> ScraperResult<Tribunal> {
        let detectado = detectar_codigo_tribunal(numero_canonico);

        match explicito {
            Some(codigo) => {
                let codigo = codigo.trim().to_uppercase();
                if let Ok(ref detectado) = detectado
                    && *detectado != codigo
                {
                    return Err(ScraperError::Validation(format!(
                        "tribunal {codigo} does not match {detectado} encoded in {numero_canonico}"
                    )));
                }
                self.get(&codigo).ok_or_else(|| {
                    ScraperError::Validation(format!("unknown tribunal code '{codigo}'"))
                })
            }
            None => {
                let codigo = detectado?;
                self.get(&codigo)
                    .ok_or_else(|| ScraperError::TribunalNaoDetectado {
                        numero: numero_canonico.to_string(),
                    })
            }
        }
    }

    fn apply_override(&self, mut tribunal: Tribunal) -> Tribunal {
        if let Some(ref base) = self.base_url_override {
            tribunal.base_url = base.clone();
        }
        tribunal
    }
}

impl Default for TribunalRouter {
    fn default() -> Self {
        Self::new()
    }
}
